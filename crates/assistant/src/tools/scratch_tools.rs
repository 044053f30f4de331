//! Scratch file-space tools. Filesystem work runs on the blocking
//! pool; sandbox violations (traversal, quota) come back as inline
//! tool errors so the model can correct itself.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use valet_domain::error::{Error, Result};
use valet_domain::tool::ToolResult;
use valet_tools::registry::empty_schema;
use valet_tools::{params_schema, ScratchSpace, Tool};

use crate::state::Services;

const CATEGORY: &str = "scratch";

pub fn register(services: &Services) {
    let scratch = &services.scratch;
    services.registry.register(write_file_tool(scratch.clone()));
    services.registry.register(read_file_tool(scratch.clone()));
    services.registry.register(list_files_tool(scratch.clone()));
    services.registry.register(delete_file_tool(scratch.clone()));
}

async fn on_blocking<T, F>(scratch: Arc<ScratchSpace>, f: F) -> Result<T>
where
    F: FnOnce(&ScratchSpace) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&scratch))
        .await
        .map_err(|e| Error::Other(format!("scratch worker: {e}")))?
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteFileParams {
    /// Relative path inside the scratch space (e.g. 'notes/draft.md').
    filename: String,
    /// UTF-8 text content to write.
    content: String,
}

fn write_file_tool(scratch: Arc<ScratchSpace>) -> Tool {
    Tool::new(
        "scratch_write_file",
        "Write a text file to the scratch working space. Creates parent \
         directories as needed and overwrites existing files.",
        CATEGORY,
        params_schema::<WriteFileParams>(),
        move |args, _ctx| {
            let scratch = scratch.clone();
            async move {
                let params: WriteFileParams = serde_json::from_value(args).map_err(Error::Json)?;
                let size = params.content.len();
                let written = on_blocking(scratch, move |s| {
                    s.write(&params.filename, params.content.as_bytes())
                        .map(|_| params.filename)
                })
                .await;
                Ok(match written {
                    Ok(name) => ToolResult::ok(json!({"written": true, "name": name, "size": size})),
                    Err(e) => ToolResult::error(e.to_string()),
                })
            }
        },
    )
    .without_confirmation()
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileParams {
    /// Relative path inside the scratch space.
    filename: String,
}

fn read_file_tool(scratch: Arc<ScratchSpace>) -> Tool {
    Tool::new(
        "scratch_read_file",
        "Read a text file from the scratch working space.",
        CATEGORY,
        params_schema::<ReadFileParams>(),
        move |args, _ctx| {
            let scratch = scratch.clone();
            async move {
                let params: ReadFileParams = serde_json::from_value(args).map_err(Error::Json)?;
                let name = params.filename.clone();
                let content = on_blocking(scratch, move |s| s.read(&params.filename)).await;
                Ok(match content {
                    Ok(content) => ToolResult::ok(json!({"name": name, "content": content})),
                    Err(e) => ToolResult::error(e.to_string()),
                })
            }
        },
    )
    .without_confirmation()
}

fn list_files_tool(scratch: Arc<ScratchSpace>) -> Tool {
    Tool::new(
        "scratch_list_files",
        "List every file in the scratch working space with size, \
         modification time, and age in hours.",
        CATEGORY,
        empty_schema(),
        move |_args, _ctx| {
            let scratch = scratch.clone();
            async move {
                let listing = on_blocking(scratch, |s| {
                    let files = s.list_files()?;
                    let total = s.total_size()?;
                    Ok((files, total))
                })
                .await;
                Ok(match listing {
                    Ok((files, total)) => {
                        let count = files.len();
                        ToolResult::ok(json!({
                            "files": files,
                            "count": count,
                            "total_size": total,
                        }))
                    }
                    Err(e) => ToolResult::error(e.to_string()),
                })
            }
        },
    )
    .without_confirmation()
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteFileParams {
    /// Relative path inside the scratch space.
    filename: String,
}

fn delete_file_tool(scratch: Arc<ScratchSpace>) -> Tool {
    Tool::new(
        "scratch_delete_file",
        "Delete a file from the scratch working space.",
        CATEGORY,
        params_schema::<DeleteFileParams>(),
        move |args, _ctx| {
            let scratch = scratch.clone();
            async move {
                let params: DeleteFileParams = serde_json::from_value(args).map_err(Error::Json)?;
                let name = params.filename.clone();
                let deleted = on_blocking(scratch, move |s| s.delete(&params.filename)).await;
                Ok(match deleted {
                    Ok(deleted) => ToolResult::ok(json!({"deleted": deleted, "name": name})),
                    Err(e) => ToolResult::error(e.to_string()),
                })
            }
        },
    )
}
