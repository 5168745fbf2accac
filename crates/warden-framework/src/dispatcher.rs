//! The dispatch engine.
//!
//! [`DispatchEngine`] owns the registry, cooldown tracker, guard pipeline and
//! admission control, and drives one inbound event through them:
//!
//! ```text
//! Received ─► Parsed ─► Resolved ─► CooldownChecked ─► GuardsPassed ─► ArgsValid
//!    │           │          │              │                 │             │
//!    │       (Ignored) (NotFound)     (Rejected)        (Rejected)    (Rejected)
//!    ▼
//! Admitted ─► Executing ─► Completed | Failed | TimedOut
//! ```
//!
//! Every rejection and failure is answered in the originating chat with a
//! short, non-leaking message; the full detail only goes to the log.
//!
//! # Execution
//!
//! The handler body runs on its own tokio task under the execution timeout.
//! A panic inside the body is reported as an execution failure. On timeout
//! the invocation's [`CancellationToken`] is cancelled and, depending on the
//! [`TimeoutPolicy`], the task is either left running or aborted. A detached
//! body may keep producing side effects after the user was told it failed;
//! bodies that care must poll [`Invocation::cancel`].
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = Arc::new(DispatchEngine::new(EngineSettings::default()));
//! engine.register(
//!     HandlerDefinition::new("ping")
//!         .cooldown(5)
//!         .handler(handler_fn(|inv: Invocation| async move {
//!             inv.reply("pong").await?;
//!             Ok::<_, BoxError>(())
//!         })),
//! )?;
//!
//! let outcome = engine.dispatch(transport, event).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, ServiceExt};
use tracing::{Instrument, Level, debug, error, info, span, trace, warn};
use warden_core::{BoxedTransport, ChatEvent};

use crate::command::ParsedCommand;
use crate::cooldown::{CooldownStatus, CooldownTracker};
use crate::error::{CommandError, DispatchError, LoadError};
use crate::guard::{BoxedGuard, GuardContext, GuardPipeline, GuardPipelineStats, GuardVerdict};
use crate::handler::{HandlerDefinition, HandlerDescriptor, Invocation};
use crate::lifecycle::{EngineEvent, HandlerSource, SourceChange};
use crate::queue::{AdmissionControl, QueueSettings, QueueStats};
use crate::registry::{HandlerRegistry, LoadReport, RegistryStats};
use crate::validator;

/// Reply sent when a handler fails or times out without a user message.
pub const GENERIC_ERROR_REPLY: &str = "Sorry, something went wrong while running that command.";

/// Reply sent when a task cannot be admitted.
pub const BUSY_REPLY: &str = "The bot is busy right now, please try again in a moment.";

/// Reply sent while a cooldown window is open.
pub fn cooldown_reply(remaining_secs: u64) -> String {
    format!("Please wait {remaining_secs} second(s) before using this command again.")
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Settings
// =============================================================================

/// What happens to a handler body that exceeds the execution timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Cancel its token and let it run to completion in the background.
    #[default]
    Detach,
    /// Cancel its token and abort its task at the next await point.
    Abort,
}

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Text a message must start with to be treated as a command.
    pub prefix: String,
    /// Cooldown for handlers that don't declare one.
    pub default_cooldown_secs: u64,
    pub execution_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    /// Length of the most-used list in [`EngineStats`].
    pub top_handlers: usize,
    /// Sender ids accepted by the `owner_only` guard.
    pub owners: Vec<String>,
    pub queue: QueueSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            prefix: "!".into(),
            default_cooldown_secs: 3,
            execution_timeout: Duration::from_secs(60),
            timeout_policy: TimeoutPolicy::Detach,
            top_handlers: 5,
            owners: Vec::new(),
            queue: QueueSettings::default(),
        }
    }
}

// =============================================================================
// Outcomes and stats
// =============================================================================

/// Terminal state of one dispatch.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The text is not a command.
    Ignored,
    /// No handler matches the command name.
    NotFound { command: String },
    /// Stopped before execution (cooldown, guard, validation or admission).
    Rejected {
        handler: String,
        error: DispatchError,
    },
    /// The body finished successfully.
    Completed { handler: String, elapsed: Duration },
    /// The body failed, panicked or timed out.
    Failed {
        handler: String,
        error: DispatchError,
    },
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The resolved handler, if resolution got that far.
    pub fn handler(&self) -> Option<&str> {
        match self {
            Self::Rejected { handler, .. }
            | Self::Completed { handler, .. }
            | Self::Failed { handler, .. } => Some(handler),
            Self::Ignored | Self::NotFound { .. } => None,
        }
    }

    /// The error, for rejected and failed dispatches.
    pub fn error(&self) -> Option<&DispatchError> {
        match self {
            Self::Rejected { error, .. } | Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Aggregate engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub uptime: Duration,
    pub registry: RegistryStats,
    pub active_cooldowns: usize,
    pub guards: GuardPipelineStats,
    pub queue: QueueStats,
}

// =============================================================================
// DispatchEngine
// =============================================================================

/// Owns all dispatch state. Share it behind an `Arc`.
pub struct DispatchEngine {
    settings: EngineSettings,
    registry: HandlerRegistry,
    cooldowns: CooldownTracker,
    guards: GuardPipeline,
    admission: AdmissionControl,
    events: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
    started: Instant,
}

impl DispatchEngine {
    /// Creates an engine with the builtin guards and no handlers.
    pub fn new(settings: EngineSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: HandlerRegistry::new(),
            cooldowns: CooldownTracker::new(),
            guards: GuardPipeline::with_builtins(settings.owners.iter().cloned()),
            admission: AdmissionControl::new(settings.queue),
            events,
            shutdown: CancellationToken::new(),
            started: Instant::now(),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn guards(&self) -> &GuardPipeline {
        &self.guards
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    // ─── Handler lifecycle ───────────────────────────────────────────────────

    /// Registers (or replaces) a handler and notifies subscribers.
    pub fn register(
        &self,
        definition: HandlerDefinition,
    ) -> Result<Arc<HandlerDescriptor>, LoadError> {
        match self.registry.register(definition) {
            Ok(registered) => {
                let name = registered.descriptor.name().to_string();
                self.notify(if registered.replaced {
                    EngineEvent::HandlerReloaded { name }
                } else {
                    EngineEvent::HandlerLoaded { name }
                });
                Ok(registered.descriptor)
            }
            Err(error) => {
                self.notify(EngineEvent::LoadFailed {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Registers every definition; failures are collected in the report.
    pub fn register_all<I>(&self, definitions: I) -> LoadReport
    where
        I: IntoIterator<Item = HandlerDefinition>,
    {
        let mut report = LoadReport::default();
        for definition in definitions {
            match self.register(definition) {
                Ok(d) => report.loaded.push(d.name().to_string()),
                Err(e) => report.errors.push(e),
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.errors.len(),
            "Handlers loaded"
        );
        report
    }

    /// Replaces a handler after a source change. Statistics are kept.
    pub fn reload(
        &self,
        definition: HandlerDefinition,
    ) -> Result<Arc<HandlerDescriptor>, LoadError> {
        self.register(definition)
    }

    /// Removes a handler and its aliases.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.registry.unload(name);
        if removed {
            self.notify(EngineEvent::HandlerUnloaded {
                name: name.to_lowercase(),
            });
        }
        removed
    }

    /// Applies a change reported by a source watcher.
    pub async fn apply_source_change(
        &self,
        change: &SourceChange,
        source: &dyn HandlerSource,
    ) -> Result<(), LoadError> {
        match change {
            SourceChange::Added(path) | SourceChange::Changed(path) => {
                let definition = match source.load(path).await {
                    Ok(d) => d,
                    Err(error) => {
                        warn!(
                            path  = %path.display(),
                            error = %error,
                            "Failed to load handler source"
                        );
                        self.registry.note_load_error(error.clone());
                        self.notify(EngineEvent::LoadFailed {
                            error: error.clone(),
                        });
                        return Err(error);
                    }
                };
                self.reload(definition).map(|_| ())
            }
            SourceChange::Removed(path) => {
                let Some(name) = change.handler_name() else {
                    return Err(LoadError::from_source(
                        path.display().to_string(),
                        "path has no file stem",
                    ));
                };
                if !self.unload(&name) {
                    debug!(
                        path    = %path.display(),
                        handler = %name,
                        "Removed source had no registered handler"
                    );
                }
                Ok(())
            }
        }
    }

    /// Registers a guard, replacing any guard (builtin included) of the same
    /// name.
    pub fn register_guard(&self, guard: BoxedGuard) -> Option<BoxedGuard> {
        self.guards.register(guard)
    }

    /// Subscribes to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: EngineEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Drives one inbound event through the pipeline.
    pub async fn dispatch(&self, transport: BoxedTransport, event: ChatEvent) -> DispatchOutcome {
        let Some(command) = ParsedCommand::parse(&event.text, &self.settings.prefix) else {
            return DispatchOutcome::Ignored;
        };
        let Some(descriptor) = self.registry.resolve(&command.name) else {
            trace!(command = %command.name, "Unknown command");
            return DispatchOutcome::NotFound {
                command: command.name,
            };
        };

        let span = span!(
            Level::DEBUG,
            "dispatch",
            handler = %descriptor.name(),
            user = %event.sender
        );
        self.run_pipeline(transport, Arc::new(event), command, descriptor)
            .instrument(span)
            .await
    }

    async fn run_pipeline(
        &self,
        transport: BoxedTransport,
        event: Arc<ChatEvent>,
        command: ParsedCommand,
        descriptor: Arc<HandlerDescriptor>,
    ) -> DispatchOutcome {
        let handler = descriptor.name().to_string();
        let rejected = |error: DispatchError| DispatchOutcome::Rejected {
            handler: handler.clone(),
            error,
        };

        // 1. Cooldown
        let cooldown = descriptor
            .cooldown_secs()
            .unwrap_or(self.settings.default_cooldown_secs);
        if let CooldownStatus::Active { remaining_secs } =
            self.cooldowns.check_and_arm(&event.sender, &handler, cooldown)
        {
            debug!(remaining_secs, "Handler on cooldown");
            reply(&transport, &event, &cooldown_reply(remaining_secs)).await;
            return rejected(DispatchError::CooldownActive { remaining_secs });
        }

        // 2. Guards
        let ctx = GuardContext {
            transport: Arc::clone(&transport),
            event: Arc::clone(&event),
            descriptor: Arc::clone(&descriptor),
        };
        match self.guards.run(&ctx).await {
            GuardVerdict::Passed => {}
            GuardVerdict::Rejected { guard } | GuardVerdict::Failed { guard, .. } => {
                return rejected(DispatchError::GuardRejected { guard });
            }
        }

        // 3. Arguments
        if let Some(rules) = descriptor.argument_rules()
            && let Err(e) = validator::validate(rules, &command.invocation(), &command.args, &event)
        {
            debug!(reason = %e.reason, "Argument validation failed");
            reply(&transport, &event, &e.message).await;
            return rejected(DispatchError::Validation(e.reason));
        }

        // 4. Admission and execution
        let exec = self.execute(
            Arc::clone(&transport),
            Arc::clone(&event),
            command,
            Arc::clone(&descriptor),
        );
        match self.admission.submit(&event.sender, exec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to admit task");
                reply(&transport, &event, BUSY_REPLY).await;
                rejected(e.into())
            }
        }
    }

    async fn execute(
        &self,
        transport: BoxedTransport,
        event: Arc<ChatEvent>,
        command: ParsedCommand,
        descriptor: Arc<HandlerDescriptor>,
    ) -> DispatchOutcome {
        let handler = descriptor.name().to_string();
        let cancel = self.shutdown.child_token();
        let invocation = Invocation {
            transport: Arc::clone(&transport),
            event: Arc::clone(&event),
            command: Arc::new(command),
            cancel: cancel.clone(),
        };

        info!(args = ?invocation.args(), chat = %event.chat, "Executing handler");

        let started = Instant::now();
        let mut task = tokio::spawn(descriptor.body().oneshot(invocation.clone()));
        let result: Result<(), (DispatchError, Option<String>)> =
            match tokio::time::timeout(self.settings.execution_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err((DispatchError::Execution(e.to_string()), user_message(&e))),
                Ok(Err(join)) => {
                    let detail = if join.is_panic() {
                        "handler panicked".to_string()
                    } else {
                        join.to_string()
                    };
                    Err((DispatchError::Execution(detail), None))
                }
                Err(_) => {
                    cancel.cancel();
                    if self.settings.timeout_policy == TimeoutPolicy::Abort {
                        task.abort();
                    }
                    Err((DispatchError::Timeout(self.settings.execution_timeout), None))
                }
            };
        let elapsed = started.elapsed();

        self.registry
            .record_execution(&handler, elapsed, result.is_err());

        match result {
            Ok(()) => {
                info!(elapsed_ms = elapsed.as_millis() as u64, "Handler completed");
                DispatchOutcome::Completed { handler, elapsed }
            }
            Err((error, user_message)) => {
                error!(
                    args       = ?invocation.args(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error      = %error,
                    "Handler failed"
                );
                let text = user_message.as_deref().unwrap_or(GENERIC_ERROR_REPLY);
                reply(&transport, &event, text).await;
                DispatchOutcome::Failed { handler, error }
            }
        }
    }

    // ─── Operator actions ────────────────────────────────────────────────────

    /// Aggregate statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime: self.started.elapsed(),
            registry: self.registry.stats(self.settings.top_handlers),
            active_cooldowns: self.cooldowns.active_count(),
            guards: self.guards.stats(),
            queue: self.admission.stats(),
        }
    }

    /// Zeroes every handler's statistics.
    pub fn reset_stats(&self) {
        self.registry.reset_stats();
    }

    /// Clears all cooldowns of `user`.
    pub fn clear_user_cooldowns(&self, user: &str) -> usize {
        self.cooldowns.clear_user(user)
    }

    /// Periodic housekeeping: drops expired cooldowns and idle user queues.
    pub fn maintain(&self) {
        let cooldowns = self.cooldowns.purge_expired();
        let queues = self.admission.prune_idle();
        if cooldowns > 0 || queues > 0 {
            debug!(cooldowns, queues, "Maintenance pass");
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has started.
    pub fn is_shutting_down(&self) -> bool {
        self.admission.is_closed()
    }

    /// Stops admitting work and waits up to `grace` for in-flight tasks.
    ///
    /// Tasks still running after `grace` have their cancellation tokens
    /// cancelled. Returns `true` if everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Dispatch engine shutting down");
        self.admission.close();
        let drained = tokio::time::timeout(grace, self.admission.on_idle())
            .await
            .is_ok();
        if !drained {
            warn!(grace_ms = grace.as_millis() as u64, "In-flight handlers did not finish in time");
        }
        self.shutdown.cancel();
        drained
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("guards", &self.guards)
            .finish_non_exhaustive()
    }
}

fn user_message(error: &BoxError) -> Option<String> {
    error
        .downcast_ref::<CommandError>()
        .and_then(CommandError::user_message)
        .map(str::to_string)
}

async fn reply(transport: &BoxedTransport, event: &ChatEvent, text: &str) {
    if let Err(e) = transport.reply(event, text).await {
        warn!(error = %e, chat = %event.chat, "Failed to deliver reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::guard_fn;
    use crate::handler::handler_fn;
    use crate::test_support::RecordingTransport;
    use crate::validator::{ArgType, ArgumentRules};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn engine() -> Arc<DispatchEngine> {
        Arc::new(DispatchEngine::new(EngineSettings {
            default_cooldown_secs: 0,
            ..Default::default()
        }))
    }

    fn replying(name: &str, text: &'static str) -> HandlerDefinition {
        HandlerDefinition::new(name).handler(handler_fn(move |inv: Invocation| async move {
            inv.reply(text).await?;
            Ok::<_, BoxError>(())
        }))
    }

    fn counting(name: &str, hits: Arc<AtomicUsize>) -> HandlerDefinition {
        HandlerDefinition::new(name).handler(handler_fn(move |_inv: Invocation| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        }))
    }

    fn msg(user: &str, text: &str) -> ChatEvent {
        ChatEvent::new(user, "chat", text)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_with_cooldown_end_to_end() {
        let engine = engine();
        engine.register(replying("ping", "pong").cooldown(5)).unwrap();
        let transport = RecordingTransport::new();

        let first = engine.dispatch(transport.clone(), msg("U", "!ping")).await;
        assert!(first.is_completed());
        assert_eq!(transport.last_reply().as_deref(), Some("pong"));

        let second = engine.dispatch(transport.clone(), msg("U", "!ping")).await;
        assert!(matches!(
            second.error(),
            Some(DispatchError::CooldownActive { remaining_secs: 5 })
        ));
        assert!(transport.last_reply().unwrap().contains('5'));

        tokio::time::advance(Duration::from_secs(5)).await;
        let third = engine.dispatch(transport.clone(), msg("U", "!ping")).await;
        assert!(third.is_completed());
        assert_eq!(transport.last_reply().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_non_commands_and_unknown_handlers() {
        let engine = engine();
        let transport = RecordingTransport::new();

        assert!(matches!(
            engine.dispatch(transport.clone(), msg("u", "hello")).await,
            DispatchOutcome::Ignored
        ));
        assert!(matches!(
            engine.dispatch(transport.clone(), msg("u", "!nope")).await,
            DispatchOutcome::NotFound { ref command } if command == "nope"
        ));
        assert!(transport.replies().is_empty());
    }

    #[tokio::test]
    async fn test_alias_dispatch() {
        let engine = engine();
        engine
            .register(replying("sticker", "ok").aliases(["s", "stiker"]))
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine.dispatch(transport.clone(), msg("u", "!S")).await;
        assert_eq!(outcome.handler(), Some("sticker"));
    }

    #[tokio::test]
    async fn test_guard_rejection_skips_body() {
        let engine = engine();
        let hits = Arc::new(AtomicUsize::new(0));
        engine.register_guard(guard_fn("deny", 100, |ctx: GuardContext| async move {
            ctx.reply("denied").await;
            Ok::<_, BoxError>(false)
        }));
        engine
            .register(counting("secret", hits.clone()).guard("deny"))
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine.dispatch(transport.clone(), msg("u", "!secret")).await;
        assert!(matches!(
            outcome.error(),
            Some(DispatchError::GuardRejected { guard }) if guard == "deny"
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(transport.replies(), vec!["denied"]);
    }

    #[tokio::test]
    async fn test_owner_only_uses_configured_owners() {
        let engine = Arc::new(DispatchEngine::new(EngineSettings {
            default_cooldown_secs: 0,
            owners: vec!["628111".into()],
            ..Default::default()
        }));
        engine.register(replying("stats", "ok").owner_only()).unwrap();
        let transport = RecordingTransport::new();

        let stranger = engine
            .dispatch(transport.clone(), msg("628999@s.whatsapp.net", "!stats"))
            .await;
        assert!(!stranger.is_completed());

        let owner = engine
            .dispatch(transport.clone(), msg("628111@s.whatsapp.net", "!stats"))
            .await;
        assert!(owner.is_completed());
    }

    #[tokio::test]
    async fn test_invalid_arguments_reply_with_usage() {
        let engine = engine();
        let hits = Arc::new(AtomicUsize::new(0));
        engine
            .register(
                counting("volume", hits.clone())
                    .args(ArgumentRules::new().min(1).arg(ArgType::number_in(0.0, 100.0))),
            )
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine
            .dispatch(transport.clone(), msg("u", "!volume 500"))
            .await;
        assert!(matches!(outcome.error(), Some(DispatchError::Validation(_))));
        let reply = transport.last_reply().unwrap();
        assert!(reply.starts_with("Number must be at most 100."));
        assert!(reply.contains("!volume <number"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(
            engine
                .dispatch(transport.clone(), msg("u", "!volume 42"))
                .await
                .is_completed()
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_reply_and_record_stats() {
        let engine = engine();
        engine
            .register(HandlerDefinition::new("strict").handler(handler_fn(
                |_inv: Invocation| async {
                    Err::<(), BoxError>(CommandError::user("Reply to an image first.").into())
                },
            )))
            .unwrap();
        engine
            .register(HandlerDefinition::new("broken").handler(handler_fn(
                |_inv: Invocation| async { Err::<(), BoxError>("disk full".into()) },
            )))
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine.dispatch(transport.clone(), msg("u", "!strict")).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(
            transport.last_reply().as_deref(),
            Some("Reply to an image first.")
        );

        engine.dispatch(transport.clone(), msg("u", "!broken")).await;
        assert_eq!(transport.last_reply().as_deref(), Some(GENERIC_ERROR_REPLY));

        let stats = engine.registry().execution_stats("broken").unwrap();
        assert_eq!((stats.uses, stats.failures), (1, 1));
    }

    #[tokio::test]
    async fn test_panicking_body_is_an_execution_failure() {
        let engine = engine();
        engine
            .register(HandlerDefinition::new("boom").handler(handler_fn(
                |_inv: Invocation| async {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, BoxError>(())
                },
            )))
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine.dispatch(transport.clone(), msg("u", "!boom")).await;
        assert!(matches!(
            outcome.error(),
            Some(DispatchError::Execution(detail)) if detail == "handler panicked"
        ));
        assert_eq!(transport.last_reply().as_deref(), Some(GENERIC_ERROR_REPLY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_detached_body() {
        let engine = Arc::new(DispatchEngine::new(EngineSettings {
            default_cooldown_secs: 0,
            execution_timeout: Duration::from_secs(60),
            ..Default::default()
        }));
        let (tx, rx) = oneshot::channel::<bool>();
        let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        engine
            .register(HandlerDefinition::new("slow").handler(handler_fn(
                move |inv: Invocation| {
                    let tx = tx.clone();
                    async move {
                        let cancelled = tokio::select! {
                            _ = inv.cancel.cancelled() => true,
                            _ = tokio::time::sleep(Duration::from_secs(120)) => false,
                        };
                        if let Some(tx) = tx.lock().take() {
                            let _ = tx.send(cancelled);
                        }
                        Ok::<_, BoxError>(())
                    }
                },
            )))
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine.dispatch(transport.clone(), msg("u", "!slow")).await;
        assert!(matches!(outcome.error(), Some(DispatchError::Timeout(_))));
        assert_eq!(transport.last_reply().as_deref(), Some(GENERIC_ERROR_REPLY));
        assert!(rx.await.unwrap());
        assert_eq!(engine.registry().execution_stats("slow").unwrap().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_body_under_abort_policy() {
        let engine = Arc::new(DispatchEngine::new(EngineSettings {
            default_cooldown_secs: 0,
            execution_timeout: Duration::from_secs(60),
            timeout_policy: TimeoutPolicy::Abort,
            ..Default::default()
        }));
        let finished = Arc::new(AtomicUsize::new(0));
        let body_finished = finished.clone();
        engine
            .register(HandlerDefinition::new("slow").handler(handler_fn(
                move |_inv: Invocation| {
                    let finished = body_finished.clone();
                    async move {
                        tokio::time::sleep(Duration::from_secs(120)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(())
                    }
                },
            )))
            .unwrap();
        let transport = RecordingTransport::new();

        let outcome = engine.dispatch(transport.clone(), msg("u", "!slow")).await;
        assert!(matches!(outcome.error(), Some(DispatchError::Timeout(_))));
        assert_eq!(transport.last_reply().as_deref(), Some(GENERIC_ERROR_REPLY));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(transport.replies().len(), 1);
    }

    #[tokio::test]
    async fn test_register_all_continues_past_malformed_definitions() {
        let engine = engine();
        let report = engine.register_all([
            replying("ping", "pong"),
            HandlerDefinition::new("broken"),
            replying("", "never"),
            replying("echo", "echo"),
        ]);

        assert_eq!(report.loaded, vec!["ping", "echo"]);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_clean());
        assert_eq!(engine.registry().load_errors().len(), 2);
        assert_eq!(engine.stats().registry.load_errors, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let engine = engine();
        let mut events = engine.subscribe();

        engine.register(replying("ping", "pong")).unwrap();
        engine.reload(replying("ping", "pong!")).unwrap();
        assert!(engine.register(HandlerDefinition::new("broken")).is_err());
        assert!(engine.unload("ping"));

        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::HandlerLoaded { name: "ping".into() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::HandlerReloaded { name: "ping".into() }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::LoadFailed { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::HandlerUnloaded { name: "ping".into() }
        );
    }

    struct StemSource;

    #[async_trait]
    impl HandlerSource for StemSource {
        async fn load(&self, path: &Path) -> Result<HandlerDefinition, LoadError> {
            match path.file_stem().and_then(|s| s.to_str()) {
                Some("bad") => Err(LoadError::from_source(
                    path.display().to_string(),
                    "syntax error",
                )),
                Some(stem) => Ok(replying(stem, "hi").alias(format!("{stem}-alias"))),
                None => Err(LoadError::from_source("?", "no stem")),
            }
        }
    }

    #[tokio::test]
    async fn test_source_changes_drive_registry() {
        let engine = engine();
        let added = SourceChange::Added(PathBuf::from("handlers/greet.rs"));
        engine.apply_source_change(&added, &StemSource).await.unwrap();
        assert!(engine.registry().resolve("greet-alias").is_some());

        let bad = SourceChange::Changed(PathBuf::from("handlers/bad.rs"));
        assert!(engine.apply_source_change(&bad, &StemSource).await.is_err());
        assert_eq!(engine.registry().load_errors().len(), 1);

        let removed = SourceChange::Removed(PathBuf::from("handlers/greet.rs"));
        engine.apply_source_change(&removed, &StemSource).await.unwrap();
        assert!(engine.registry().resolve("greet").is_none());
        assert!(engine.registry().resolve("greet-alias").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let engine = engine();
        engine.register(replying("ping", "pong")).unwrap();
        let transport = RecordingTransport::new();

        assert!(engine.shutdown(Duration::from_secs(1)).await);
        assert!(engine.is_shutting_down());

        let outcome = engine.dispatch(transport.clone(), msg("u", "!ping")).await;
        assert!(matches!(outcome.error(), Some(DispatchError::Admission(_))));
        assert_eq!(transport.last_reply().as_deref(), Some(BUSY_REPLY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_dispatch_and_stats() {
        let engine = Arc::new(DispatchEngine::new(EngineSettings {
            default_cooldown_secs: 0,
            queue: QueueSettings {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        }));
        engine.register(replying("ping", "pong")).unwrap();
        engine.register(replying("echo", "echo")).unwrap();
        let transport = RecordingTransport::new();

        for _ in 0..2 {
            assert!(
                engine
                    .dispatch(transport.clone(), msg("u", "!ping"))
                    .await
                    .is_completed()
            );
        }
        engine.dispatch(transport.clone(), msg("u", "!echo")).await;

        let stats = engine.stats();
        assert!(stats.queue.enabled);
        assert_eq!(stats.queue.user_queues, 1);
        assert_eq!(stats.queue.in_flight, 0);
        assert_eq!(stats.registry.top[0].name, "ping");
        assert_eq!(stats.registry.top[0].stats.uses, 2);

        engine.reset_stats();
        assert!(engine.stats().registry.top.is_empty());
    }
}
