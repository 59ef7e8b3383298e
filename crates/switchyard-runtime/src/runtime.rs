//! Worker-pool runtime.
//!
//! The runtime owns a [`Router`] and a bounded update queue. Transports push
//! parsed updates through an [`UpdateSender`]; a fixed number of worker tasks
//! pull from the queue and dispatch each update.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use switchyard_runtime::SwitchyardRuntime;
//!
//! // Auto-loads switchyard.toml from the current or user config directory
//! let runtime = SwitchyardRuntime::new();
//! runtime.router().register_exact(HandlerKind::MessageText, "/start", start)?;
//!
//! let sender = runtime.sender();
//! tokio::spawn(async move { poll_platform(sender).await });
//!
//! runtime.run().await?;
//! ```
//!
//! Shutdown stops the workers after the update each one is handling.
//! Updates still queued at that point stay queued for the next run.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use switchyard_core::{BoxedDispatcher, DispatchOutcome, RandomIdGenerator, Update};
use switchyard_framework::{BoxedHandler, Handler, Router, into_handler};

use crate::config::{ConfigLoader, SwitchyardConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Updates taken off the queue and dispatched.
    pub dispatched: u64,
    /// Updates that matched at least one handler.
    pub matched: u64,
    /// Updates that matched nothing.
    pub unhandled: u64,
    /// Callbacks that panicked.
    pub failed_callbacks: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    dispatched: AtomicU64,
    matched: AtomicU64,
    unhandled: AtomicU64,
    failed_callbacks: AtomicU64,
}

impl StatsCounters {
    fn record(&self, outcome: DispatchOutcome) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if outcome.is_unhandled() {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.matched.fetch_add(1, Ordering::Relaxed);
        }
        self.failed_callbacks
            .fetch_add(outcome.failed as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            failed_callbacks: self.failed_callbacks.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// UpdateSender
// =============================================================================

/// Handle for pushing updates into a runtime's queue.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    tx: mpsc::Sender<Update>,
}

impl UpdateSender {
    /// Queues `update`, waiting for room if the queue is full.
    pub async fn send(&self, update: Update) -> RuntimeResult<()> {
        self.tx.send(update).await.map_err(|_| RuntimeError::Closed)
    }

    /// Queues `update` without waiting.
    pub fn try_send(&self, update: Update) -> RuntimeResult<()> {
        self.tx.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RuntimeError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => RuntimeError::Closed,
        })
    }

    /// Remaining queue capacity.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

// =============================================================================
// SwitchyardRuntime
// =============================================================================

/// The runtime that feeds queued updates to a [`Router`].
///
/// # Custom Configuration
///
/// ```rust,ignore
/// let runtime = SwitchyardRuntime::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .default_handler(fallback)
///     .build()?;
/// ```
pub struct SwitchyardRuntime {
    config: SwitchyardConfig,
    router: Router,
    tx: mpsc::Sender<Update>,
    rx: Arc<Mutex<mpsc::Receiver<Update>>>,
    stats: Arc<StatsCounters>,
    running: AtomicBool,
}

impl SwitchyardRuntime {
    /// Creates a runtime with automatic configuration loading.
    ///
    /// Falls back to defaults if the configuration cannot be loaded or is
    /// invalid.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .with_user_config_dir()
            .load()
            .and_then(|config| validate_config(&config).map(|()| config))
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                SwitchyardConfig::default()
            });

        Self::with_default_handler(&config, None)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Validates `config` and creates a runtime from it.
    ///
    /// Initializes logging as configured, unless a subscriber is already set.
    pub fn from_config(config: &SwitchyardConfig) -> RuntimeResult<Self> {
        validate_config(config)?;
        Ok(Self::with_default_handler(config, None))
    }

    fn with_default_handler(config: &SwitchyardConfig, fallback: Option<BoxedHandler>) -> Self {
        logging::init_from_config(&config.logging);

        let mut router = Router::builder()
            .policy(config.dispatch.policy)
            .id_generator(Arc::new(RandomIdGenerator::new(config.dispatch.id_length)));
        if let Some(handler) = fallback {
            router = router.boxed_default_handler(handler);
        }

        // A zero capacity would panic in mpsc::channel.
        let (tx, rx) = mpsc::channel(config.runtime.queue_capacity.max(1));

        info!(
            log_level = %config.logging.level,
            policy = ?config.dispatch.policy,
            workers = config.runtime.workers,
            queue_capacity = config.runtime.queue_capacity,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            router: router.build(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            stats: Arc::new(StatsCounters::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &SwitchyardConfig {
        &self.config
    }

    /// The router handlers are registered on.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The router as a type-erased [`Dispatcher`](switchyard_core::Dispatcher).
    pub fn dispatcher(&self) -> BoxedDispatcher {
        Arc::new(self.router.clone())
    }

    /// A new handle for queueing updates.
    pub fn sender(&self) -> UpdateSender {
        UpdateSender {
            tx: self.tx.clone(),
        }
    }

    /// Current dispatch counters.
    pub fn stats(&self) -> RuntimeStats {
        self.stats.snapshot()
    }

    /// Returns whether the workers are currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs the workers until a shutdown signal is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Switchyard runtime is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs the workers until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Ok(());
        }

        let token = CancellationToken::new();
        let mut workers = JoinSet::new();
        for worker in 0..self.config.runtime.workers.max(1) {
            let span = info_span!("worker", worker);
            workers.spawn(
                worker_loop(
                    Arc::clone(&self.rx),
                    self.router.clone(),
                    Arc::clone(&self.stats),
                    token.clone(),
                )
                .instrument(span),
            );
        }
        info!(workers = workers.len(), "Runtime started");

        shutdown.await;

        info!("Stopping Switchyard runtime");
        token.cancel();
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        self.running.store(false, Ordering::Release);
        info!(stats = ?self.stats(), "Runtime stopped");

        Ok(())
    }
}

impl Default for SwitchyardRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<Update>>>,
    router: Router,
    stats: Arc<StatsCounters>,
    token: CancellationToken,
) {
    debug!("Worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            update = async { rx.lock().await.recv().await } => update,
        };

        // The runtime keeps a sender, so the queue only closes when it is dropped.
        let Some(update) = next else { break };

        let outcome = router.dispatch(update).await;
        trace!(
            matched = outcome.matched,
            invoked = outcome.invoked,
            "Update dispatched"
        );
        stats.record(outcome);
    }
    debug!("Worker stopped");
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                if let Err(e) = signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`SwitchyardRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    default_handler: Option<BoxedHandler>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir().with_user_config_dir(),
            default_handler: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: SwitchyardConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Sets a handler run for updates nothing else matched.
    pub fn default_handler<H: Handler>(mut self, handler: H) -> Self {
        self.default_handler = Some(into_handler(handler));
        self
    }

    /// Loads and validates the configuration, then builds the runtime.
    pub fn build(self) -> RuntimeResult<SwitchyardRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(SwitchyardRuntime::with_default_handler(
            &config,
            self.default_handler,
        ))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use switchyard_core::{CallbackQuery, Dispatcher, Message, User, UserId};
    use switchyard_framework::{DispatchPolicy, HandlerContext, HandlerKind};
    use tokio::sync::Notify;

    use crate::config::{DispatchConfig, RuntimeConfig};

    fn config(workers: usize, queue_capacity: usize) -> SwitchyardConfig {
        SwitchyardConfig {
            runtime: RuntimeConfig {
                workers,
                queue_capacity,
            },
            ..Default::default()
        }
    }

    fn text_from(update_id: i64, user: i64, text: &str) -> Update {
        Update::message(update_id, Message::text(update_id, User::new(user, "u"), text))
    }

    /// Polls `cond` until it holds or a second has passed.
    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_dispatch_queued_updates() {
        let runtime = Arc::new(SwitchyardRuntime::from_config(&config(3, 16)).unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        runtime
            .router()
            .register_exact(HandlerKind::MessageText, "/start", move |_ctx: HandlerContext| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        let sender = runtime.sender();
        for i in 0..10 {
            sender.send(text_from(i, 1, "/start")).await.unwrap();
        }
        sender.send(text_from(10, 1, "unknown")).await.unwrap();

        let stop = Arc::new(Notify::new());
        let handle = {
            let runtime = Arc::clone(&runtime);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move { runtime.run_until(stop.notified()).await })
        };

        wait_until(|| runtime.stats().dispatched == 11).await;
        stop.notify_one();
        handle.await.unwrap().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(
            runtime.stats(),
            RuntimeStats {
                dispatched: 11,
                matched: 10,
                unhandled: 1,
                failed_callbacks: 0,
            }
        );
        assert!(!runtime.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_step_conversation_through_queue() {
        let runtime = Arc::new(SwitchyardRuntime::from_config(&config(1, 8)).unwrap());
        let replies = Arc::new(transcript::Transcript::default());

        let log = Arc::clone(&replies);
        runtime
            .router()
            .register_exact(HandlerKind::MessageText, "/name", move |ctx: HandlerContext| {
                let log = Arc::clone(&log);
                async move {
                    log.push("asked".to_string());
                    let log = Arc::clone(&log);
                    ctx.register_step(
                        move |ctx: HandlerContext| {
                            let log = Arc::clone(&log);
                            async move {
                                log.push(format!("name={}", ctx.text().unwrap_or_default()));
                                ctx.unregister_step();
                            }
                        },
                        (),
                    )
                    .unwrap();
                }
            })
            .unwrap();

        let sender = runtime.sender();
        sender.send(text_from(1, 42, "/name")).await.unwrap();
        sender.send(text_from(2, 42, "Ferris")).await.unwrap();

        let stop = CancellationToken::new();
        let handle = {
            let runtime = Arc::clone(&runtime);
            let stop = stop.clone();
            tokio::spawn(async move { runtime.run_until(stop.cancelled_owned()).await })
        };

        wait_until(|| runtime.stats().dispatched == 2).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(replies.take(), vec!["asked", "name=Ferris"]);
        assert!(runtime.router().step_data(UserId(42)).is_none());
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let runtime = SwitchyardRuntime::from_config(&config(1, 1)).unwrap();
        let sender = runtime.sender();

        sender.try_send(text_from(1, 1, "a")).unwrap();
        assert!(matches!(
            sender.try_send(text_from(2, 1, "b")),
            Err(RuntimeError::QueueFull)
        ));
        assert_eq!(sender.capacity(), 0);
    }

    #[tokio::test]
    async fn test_send_after_runtime_dropped_is_closed() {
        let runtime = SwitchyardRuntime::from_config(&config(1, 4)).unwrap();
        let sender = runtime.sender();
        drop(runtime);

        let update = Update::callback_query(1, CallbackQuery::new("cb", User::new(1, "u"), "x"));
        assert!(matches!(sender.send(update).await, Err(RuntimeError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_handler_counted_and_workers_survive() {
        let runtime = Arc::new(SwitchyardRuntime::from_config(&config(1, 8)).unwrap());
        runtime
            .router()
            .register_exact(HandlerKind::MessageText, "boom", |_ctx: HandlerContext| async {
                if true {
                    panic!("handler failure");
                }
            })
            .unwrap();

        let sender = runtime.sender();
        sender.send(text_from(1, 1, "boom")).await.unwrap();
        sender.send(text_from(2, 1, "boom")).await.unwrap();

        let stop = CancellationToken::new();
        let handle = {
            let runtime = Arc::clone(&runtime);
            let stop = stop.clone();
            tokio::spawn(async move { runtime.run_until(stop.cancelled_owned()).await })
        };

        wait_until(|| runtime.stats().dispatched == 2).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(runtime.stats().failed_callbacks, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_predicate_does_not_stop_single_worker() {
        let runtime = Arc::new(SwitchyardRuntime::from_config(&config(1, 8)).unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        runtime
            .router()
            .register_predicate(
                |update: &Update| {
                    if update.text() == Some("boom") {
                        panic!("predicate failure");
                    }
                    false
                },
                |_ctx: HandlerContext| async {},
            )
            .unwrap();
        let counter = Arc::clone(&hits);
        runtime
            .router()
            .register_exact(HandlerKind::MessageText, "fine", move |_ctx: HandlerContext| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        let sender = runtime.sender();
        sender.send(text_from(1, 1, "boom")).await.unwrap();
        sender.send(text_from(2, 1, "fine")).await.unwrap();

        let stop = CancellationToken::new();
        let handle = {
            let runtime = Arc::clone(&runtime);
            let stop = stop.clone();
            tokio::spawn(async move { runtime.run_until(stop.cancelled_owned()).await })
        };

        wait_until(|| runtime.stats().dispatched == 2).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.stats().unhandled, 1);
    }

    #[tokio::test]
    async fn test_builder_applies_policy_and_default_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let runtime = SwitchyardRuntime::builder()
            .without_env()
            .merge(SwitchyardConfig {
                dispatch: DispatchConfig {
                    policy: DispatchPolicy::FanOut,
                    id_length: 12,
                },
                ..Default::default()
            })
            .default_handler(move |_ctx: HandlerContext| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        assert_eq!(runtime.router().policy(), DispatchPolicy::FanOut);
        let id = runtime
            .router()
            .register_prefix(HandlerKind::MessageText, "/", |_ctx: HandlerContext| async {})
            .unwrap();
        assert_eq!(id.as_str().len(), 12);

        let outcome = runtime.dispatcher().dispatch(text_from(1, 1, "plain")).await;
        assert_eq!(outcome.invoked, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config_rejects_short_ids() {
        let config = SwitchyardConfig {
            dispatch: DispatchConfig {
                id_length: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            SwitchyardRuntime::from_config(&config),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = SwitchyardRuntime::builder()
            .without_env()
            .merge(config(0, 16))
            .build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    mod transcript {
        use std::sync::Mutex;

        /// Ordered record of handler side effects.
        #[derive(Default)]
        pub struct Transcript(Mutex<Vec<String>>);

        impl Transcript {
            pub fn push(&self, entry: String) {
                self.0.lock().unwrap().push(entry);
            }

            pub fn take(&self) -> Vec<String> {
                std::mem::take(&mut *self.0.lock().unwrap())
            }
        }
    }
}
