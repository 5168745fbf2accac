//! Runtime orchestration: config, logging and the inbound event loop.
//!
//! ```text
//!  transport ──ChatEvent──► mpsc ──► serve() ──spawn──► DispatchEngine::dispatch
//!                                      │
//!                          maintenance tick (cooldowns, idle queues)
//!                          Ctrl+C / shutdown_token() ──► shutdown()
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use warden_runtime::WardenRuntime;
//!
//! let runtime = WardenRuntime::builder()
//!     .config_file("config/warden.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.engine().register(ping())?;
//! runtime.serve(transport, inbound_rx).await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::Provider;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};
use warden_core::{BoxedTransport, ChatEvent};
use warden_framework::DispatchEngine;

use crate::config::{ConfigLoader, WardenConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The Warden runtime: owns the dispatch engine and drives it from an
/// inbound event channel.
pub struct WardenRuntime {
    config: WardenConfig,
    engine: Arc<DispatchEngine>,
    /// Cancelled to stop `serve`.
    shutdown: CancellationToken,
    /// Spawned dispatches, awaited on shutdown.
    tasks: TaskTracker,
}

impl WardenRuntime {
    /// Creates a runtime builder that loads configuration from files and env.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded and validated configuration.
    ///
    /// Initializes logging; an already-installed subscriber is left in place.
    pub fn from_config(config: &WardenConfig) -> Self {
        logging::init_from_config(&config.logging);

        let engine = Arc::new(DispatchEngine::new(config.to_engine_settings()));

        info!(
            prefix = %config.engine.command_prefix,
            queue_enabled = config.queue.enabled,
            log_level = %config.logging.level,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            engine,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// The dispatch engine; register handlers and guards through it.
    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.engine
    }

    /// A token that stops [`serve`](Self::serve) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of dispatches currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Dispatches every event from `events` until Ctrl+C, the shutdown token,
    /// or the channel closing, then shuts down.
    pub async fn serve(
        &self,
        transport: BoxedTransport,
        mut events: mpsc::Receiver<ChatEvent>,
    ) -> RuntimeResult<()> {
        if self.shutdown.is_cancelled() || self.engine.is_shutting_down() {
            return Err(RuntimeError::ShutDown);
        }

        let sweep = Duration::from_secs(self.config.engine.cooldown_sweep_secs.max(1));
        let mut maintenance = tokio::time::interval_at(Instant::now() + sweep, sweep);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut watch_ctrl_c = true;

        info!(
            transport = transport.id(),
            "Warden runtime is now serving. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                result = &mut ctrl_c, if watch_ctrl_c => {
                    match result {
                        Ok(()) => {
                            info!("Received Ctrl+C, shutting down");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to listen for Ctrl+C");
                            watch_ctrl_c = false;
                        }
                    }
                }
                _ = maintenance.tick() => self.engine.maintain(),
                event = events.recv() => match event {
                    Some(event) => self.spawn_dispatch(&transport, event),
                    None => {
                        info!("Inbound event channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn spawn_dispatch(&self, transport: &BoxedTransport, event: ChatEvent) {
        let engine = Arc::clone(&self.engine);
        let transport = Arc::clone(transport);
        self.tasks.spawn(async move {
            let outcome = engine.dispatch(transport, event).await;
            trace!(?outcome, "Dispatch finished");
        });
    }

    /// Stops serving, lets spawned dispatches finish, then closes the
    /// engine's queues.
    ///
    /// Each wait is bounded by the execution timeout. Returns `true` if
    /// everything finished in time. Safe to call more than once.
    pub async fn shutdown(&self) -> bool {
        self.shutdown.cancel();
        self.tasks.close();

        let grace = Duration::from_secs(self.config.engine.execution_timeout_secs);
        let tasks_done = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if tasks_done {
            debug!("All dispatches finished");
        } else {
            warn!(remaining = self.tasks.len(), "Dispatches still running at shutdown");
        }

        let queue_drained = self.engine.shutdown(grace).await;
        info!("Runtime stopped");

        tasks_done && queue_drained
    }
}

impl std::fmt::Debug for WardenRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardenRuntime")
            .field("engine", &self.engine)
            .field("in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`WardenRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading `WARDEN_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a figment provider below the config files.
    pub fn merge<P: Provider>(mut self, provider: P) -> Self {
        self.config_loader = self.config_loader.merge(provider);
        self
    }

    /// Edits the loaded configuration before it is validated.
    pub fn adjust<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut WardenConfig) + Send + 'static,
    {
        self.config_loader = self.config_loader.adjust(f);
        self
    }

    /// Loads and validates the configuration, then builds the runtime.
    pub fn build(self) -> RuntimeResult<WardenRuntime> {
        let config = self.config_loader.load()?;
        Ok(WardenRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use warden_core::{MessageRef, Transport, TransportResult};
    use warden_framework::prelude::*;

    use super::*;
    use crate::config::ConfigError;

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn id(&self) -> &str {
            "mock"
        }

        async fn send_text(&self, chat: &str, text: &str) -> TransportResult<MessageRef> {
            let mut sent = self.sent.lock();
            sent.push(text.to_string());
            Ok(MessageRef::new(chat, sent.len().to_string()))
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn runtime() -> WardenRuntime {
        let runtime = WardenRuntime::from_config(&WardenConfig::default());
        runtime
            .engine()
            .register(HandlerDefinition::new("ping").handler(handler_fn(
                |inv: Invocation| async move {
                    inv.reply("pong").await?;
                    Ok::<_, BoxError>(())
                },
            )))
            .unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_serve_dispatches_until_channel_closes() {
        let runtime = runtime();
        let transport = Arc::new(MockTransport::default());
        let (tx, rx) = mpsc::channel(8);

        tx.send(ChatEvent::new("u1", "c1", "!ping")).await.unwrap();
        tx.send(ChatEvent::new("u2", "c1", "hello")).await.unwrap();
        tx.send(ChatEvent::new("u3", "c1", "!ping")).await.unwrap();
        drop(tx);

        runtime.serve(transport.clone(), rx).await.unwrap();

        assert_eq!(*transport.sent.lock(), vec!["pong".to_string(), "pong".to_string()]);
        assert_eq!(runtime.in_flight(), 0);
        assert!(runtime.engine().is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_serve() {
        let runtime = Arc::new(runtime());
        let token = runtime.shutdown_token();
        let (_tx, rx) = mpsc::channel::<ChatEvent>(8);

        let serving = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move {
                runtime
                    .serve(Arc::new(MockTransport::default()), rx)
                    .await
            })
        };

        token.cancel();
        serving.await.unwrap().unwrap();

        let (_tx, rx) = mpsc::channel::<ChatEvent>(1);
        let again = runtime.serve(Arc::new(MockTransport::default()), rx).await;
        assert!(matches!(again, Err(RuntimeError::ShutDown)));
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_running() {
        let runtime = runtime();
        assert!(runtime.shutdown().await);
        assert!(runtime.shutdown().await);
    }

    #[test]
    fn test_builder_missing_file() {
        let result = WardenRuntime::builder()
            .config_file("/nonexistent/warden.toml")
            .without_env()
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::FileNotFound(_)))
        ));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_builder_adjust_keeps_camel_case_file_loadable() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("warden.toml", "[queue]\nqueueEnabled = true\n")?;

            let runtime = WardenRuntime::builder()
                .search_path(jail.directory())
                .without_env()
                .adjust(|config| config.engine.owner_ids.push("42".into()))
                .build()
                .map_err(|e| e.to_string())?;

            assert!(runtime.config().queue.enabled);
            assert_eq!(runtime.config().engine.owner_ids, vec!["42".to_string()]);
            Ok(())
        });
    }
}
