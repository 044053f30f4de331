use std::sync::Arc;

use valet_domain::config::Config;
use valet_providers::LlmProvider;
use valet_sessions::SessionStore;
use valet_tools::{ScratchSpace, ToolRegistry};

use crate::memory::MemoryStore;
use crate::notify::NotificationRouter;
use crate::runtime::confirm::ConfirmationBroker;
use crate::scheduler::engine::SchedulerEngine;
use crate::scheduler::store::TaskStore;

/// Shared service bundle passed to the turn loop, tools, scheduler,
/// and transports. Built once in `main`; everything here is cheap to
/// clone.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmProvider>,
    pub registry: Arc<ToolRegistry>,
    pub router: Arc<NotificationRouter>,
    pub sessions: Arc<SessionStore>,
    pub broker: Arc<ConfirmationBroker>,
    pub task_store: Arc<TaskStore>,
    pub scheduler: Arc<SchedulerEngine>,
    pub scratch: Arc<ScratchSpace>,
    /// External long-term memory; `None` runs without recall.
    pub memory: Option<Arc<dyn MemoryStore>>,
}
