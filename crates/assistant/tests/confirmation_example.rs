//! Drift detection between the registered built-in tools and the
//! shipped confirmation-policy example file.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use valet_assistant::notify::NotificationRouter;
use valet_assistant::runtime::confirm::ConfirmationBroker;
use valet_assistant::scheduler::{SchedulerEngine, TaskStore};
use valet_assistant::tools::register_builtin_tools;
use valet_assistant::Services;
use valet_domain::config::Config;
use valet_domain::error::Error;
use valet_providers::{ChatRequest, ChatResponse, LlmProvider};
use valet_tools::{ConfirmationPolicy, ScratchSpace, ToolRegistry};

struct NoLlm;

#[async_trait::async_trait]
impl LlmProvider for NoLlm {
    async fn chat(&self, _req: ChatRequest) -> valet_domain::Result<ChatResponse> {
        Err(Error::Other("no llm".into()))
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> valet_domain::Result<
        valet_domain::stream::BoxStream<'static, valet_domain::Result<valet_domain::stream::StreamEvent>>,
    > {
        Err(Error::Other("no llm".into()))
    }

    fn provider_id(&self) -> &str {
        "none"
    }
}

fn builtin_tool_names(dir: &tempfile::TempDir) -> BTreeSet<String> {
    let mut config = Config::default();
    config.state_dir = dir.path().join("state");
    config.config_dir = dir.path().join("config");

    let registry = Arc::new(ToolRegistry::new(ConfirmationPolicy::unconfigured()));
    let router = Arc::new(NotificationRouter::new(None));
    let broker = Arc::new(ConfirmationBroker::new(router.clone(), Duration::from_secs(1)));
    let task_store = Arc::new(TaskStore::new(config.database_path()));
    let scheduler = Arc::new(SchedulerEngine::new(
        task_store.clone(),
        "UTC",
        Duration::from_secs(30),
    ));
    let scratch = Arc::new(ScratchSpace::new(config.scratch_root()).unwrap());

    let services = Services {
        config: Arc::new(config),
        llm: Arc::new(NoLlm),
        registry: registry.clone(),
        router,
        sessions: Arc::new(valet_sessions::SessionStore::new(50)),
        broker,
        task_store,
        scheduler,
        scratch,
        memory: None,
    };
    register_builtin_tools(&services);
    registry.tool_names().into_iter().collect()
}

#[derive(Deserialize)]
struct PolicyExample {
    tools: HashMap<String, bool>,
}

fn example_tool_names() -> BTreeSet<String> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/tool_confirmations.toml.example");
    let raw = std::fs::read_to_string(path).expect("example policy file present");
    let parsed: PolicyExample = toml::from_str(&raw).expect("example policy file parses");
    parsed.tools.into_keys().collect()
}

#[tokio::test]
async fn example_policy_covers_every_builtin_tool() {
    let dir = tempfile::tempdir().unwrap();
    let registered = builtin_tool_names(&dir);
    let listed = example_tool_names();

    let missing: Vec<&String> = registered.difference(&listed).collect();
    assert!(missing.is_empty(), "tools missing from the example policy: {missing:?}");

    let stale: Vec<&String> = listed.difference(&registered).collect();
    assert!(stale.is_empty(), "stale tools in the example policy: {stale:?}");
}
