//! # Warden
//!
//! A command dispatch and admission-control engine for chat bots.
//!
//! Warden sits between a chat transport and a set of command handlers. Each
//! inbound message is parsed as a prefixed command, resolved by name or alias,
//! and pushed through cooldowns, permission guards, argument validation and a
//! two-level (per-user, global) admission queue before the handler runs under
//! a timeout.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  ChatEvent  ┌──────────────┐       ┌──────────────────────────────┐
//! │  Transport  │────────────▶│   Runtime    │──────▶│ DispatchEngine               │
//! │ (any chat)  │◀────────────│ (event loop) │ spawn │  registry · cooldowns ·      │
//! └─────────────┘    reply    └──────────────┘       │  guards · validator · queue  │
//!                                                    └──────────────────────────────┘
//! ```
//!
//! - **Core**: the inbound event and the outbound transport trait
//! - **Framework**: the dispatch engine and everything it orchestrates
//! - **Runtime**: config, logging and the serve loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warden::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = WardenRuntime::builder().build()?;
//!
//!     runtime.engine().register(
//!         HandlerDefinition::new("ping")
//!             .alias("p")
//!             .cooldown(5)
//!             .handler(handler_fn(|inv: Invocation| async move {
//!                 inv.reply("pong").await?;
//!                 Ok::<_, BoxError>(())
//!             })),
//!     )?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(64);
//!     let transport = MyTransport::connect(tx).await?;
//!     runtime.serve(transport, rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use warden_core as core;
pub use warden_framework as framework;
pub use warden_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use warden::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use warden_runtime::{WardenConfig, WardenRuntime};

    // Engine
    pub use warden_framework::{DispatchEngine, DispatchOutcome, EngineSettings};

    // Handler authoring
    pub use warden_framework::prelude::*;

    // Transport side
    pub use warden_core::{BoxedTransport, ChatEvent, MessageRef, Transport, TransportResult};
}
