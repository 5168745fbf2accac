//! # Warden Framework
//!
//! The dispatch core: turns an inbound [`ChatEvent`](warden_core::ChatEvent)
//! into a validated, throttled invocation of a registered handler.
//!
//! ```text
//! event ─► parse ─► resolve ─► cooldown ─► guards ─► validate ─► admit ─► execute ─► record
//!            │         │           │          │          │          │
//!        command   registry    cooldown     guard    validator    queue
//! ```
//!
//! This layer provides:
//! - [`HandlerRegistry`]: names, aliases, hot reload and execution statistics
//! - [`GuardPipeline`]: ordered builtin and custom guards
//! - [`CooldownTracker`]: per-(user, handler) cooldown windows
//! - [`validator`]: positional argument rules and usage messages
//! - [`AdmissionControl`]: per-user and global concurrency/rate limiting
//! - [`DispatchEngine`]: the orchestrator owning all of the above
//!
//! It has no filesystem or network dependency; transports and hot-reload
//! watchers plug in through [`Transport`](warden_core::Transport) and
//! [`HandlerSource`].

pub mod command;
pub mod cooldown;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod handler;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use command::ParsedCommand;
pub use cooldown::{CooldownStatus, CooldownTracker, MAX_COOLDOWN_SECS};
pub use dispatcher::{
    BUSY_REPLY, DispatchEngine, DispatchOutcome, EngineSettings, EngineStats,
    GENERIC_ERROR_REPLY, TimeoutPolicy, cooldown_reply,
};
pub use error::{AdmissionError, CommandError, DispatchError, LoadError, ValidationError};
pub use guard::{
    BoxedGuard, Guard, GuardContext, GuardPipeline, GuardPipelineStats, GuardStats,
    GuardVerdict, guard_fn,
};
pub use handler::{Gates, HandlerBody, HandlerDefinition, HandlerDescriptor, Invocation, handler_fn};
pub use lifecycle::{EngineEvent, HandlerSource, SourceChange};
pub use queue::{AdmissionControl, AdmissionQueue, QueueLimits, QueueSettings, QueueStats};
pub use registry::{
    ExecutionStats, HandlerRegistry, HandlerUsage, LoadReport, Registered, RegistryConflict,
    RegistryStats,
};
pub use validator::{ArgType, ArgumentRules, parse_boolean};

pub use tower::BoxError;

/// Everything a handler author usually needs.
pub mod prelude {
    pub use crate::error::CommandError;
    pub use crate::guard::{Guard, GuardContext, guard_fn};
    pub use crate::handler::{HandlerDefinition, Invocation, handler_fn};
    pub use crate::validator::{ArgType, ArgumentRules, parse_boolean};
    pub use tower::BoxError;
}
