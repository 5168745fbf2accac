//! Warden Runtime - orchestration layer for the Warden dispatch engine.
//!
//! This crate provides:
//! - Layered configuration loading and validation ([`config`])
//! - Logging setup ([`logging`])
//! - The event loop that feeds a [`DispatchEngine`](warden_framework::DispatchEngine)
//!   from an inbound channel ([`WardenRuntime`])
//!
//! ```ignore
//! use warden_runtime::WardenRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = WardenRuntime::builder().build()?;
//!     runtime.engine().register(ping())?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(64);
//!     let transport = MyTransport::connect(tx).await?;
//!
//!     // Runs until Ctrl+C
//!     runtime.serve(transport, rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, Profile, WardenConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, WardenRuntime};

// Re-exports for use by other crates
pub use figment;
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler authors.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
