//! Built-in tools: scheduling, scratch file space, and small
//! utilities. Everything else (mail, calendar, documents, search)
//! plugs into the same registry from the outside.

pub mod scheduler_tools;
pub mod scratch_tools;
pub mod utility_tools;

use crate::state::Services;

/// Register every built-in tool. Called once during startup.
pub fn register_builtin_tools(services: &Services) {
    scheduler_tools::register(services);
    scratch_tools::register(services);
    utility_tools::register(services);
}
