//! Hook Dispatcher: maps incoming tool/agent events to matching hook
//! commands, wraps each call in the circuit breaker, shapes a scrubbed
//! environment, and aggregates results.

mod dispatcher;
mod types;

pub use dispatcher::HookDispatcher;
pub use types::{HookDefinition, HookError, HookEvent, HookResult, OutputFormat, SingleHookResult};
