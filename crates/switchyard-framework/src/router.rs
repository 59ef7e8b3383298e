//! Update routing.
//!
//! [`Router`] ties the [`HandlerRegistry`] and the [`StepHandlers`] index
//! together and decides which matched callbacks run for an update.
//!
//! # Dispatch
//!
//! 1. The registry returns every matching handler in insertion order.
//! 2. If the sender has an active step handler among the matches, it is
//!    moved to the front: step handlers take precedence over general ones.
//! 3. The [`DispatchPolicy`] picks what runs: only the first match
//!    ([`FirstMatch`](DispatchPolicy::FirstMatch), the default) or every
//!    match in order ([`FanOut`](DispatchPolicy::FanOut)).
//! 4. If nothing matched, the default handler runs, when one is set.
//!
//! Callbacks run with no lock held, so they may register and remove handlers
//! freely. A panicking callback is logged and counted in the
//! [`DispatchOutcome`]; it never leaves the tables half-modified and never
//! prevents the remaining callbacks from running.
//!
//! ```rust,ignore
//! use switchyard_framework::{HandlerKind, Router};
//!
//! let router = Router::new();
//! router.register_exact(HandlerKind::MessageText, "/start", start)?;
//! router.register_prefix(HandlerKind::CallbackData, "page:", paginate)?;
//!
//! let outcome = router.dispatch(update).await;
//! ```

use std::convert::Infallible;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tower::Service;
use tracing::{Instrument, Level, debug, error, span, trace};

use switchyard_core::{
    BoxedIdGenerator, DispatchOutcome, Dispatcher, HandlerId, RandomIdGenerator, Update, UserId,
};

use crate::error::RegistryResult;
use crate::handler::{BoxedHandler, Handler, HandlerContext, into_handler};
use crate::matcher::{HandlerKind, HandlerSpec};
use crate::registry::{HandlerRegistry, MatchedHandler};
use crate::step::{StepData, StepHandlers};

/// Which of the matched handlers are invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Invoke only the first match.
    #[default]
    FirstMatch,
    /// Invoke every match, sequentially, in match order.
    FanOut,
}

struct RouterInner {
    registry: Arc<HandlerRegistry>,
    steps: StepHandlers,
    policy: DispatchPolicy,
    default_handler: Option<BoxedHandler>,
}

/// Registry, step index and dispatch policy behind one cheap handle.
///
/// Cloning a `Router` yields another handle to the same tables.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates a router with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a router.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// The underlying handler registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// The step handler index.
    pub fn steps(&self) -> &StepHandlers {
        &self.inner.steps
    }

    /// The active dispatch policy.
    pub fn policy(&self) -> DispatchPolicy {
        self.inner.policy
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers `handler` under `spec`.
    pub fn register<H: Handler>(&self, spec: HandlerSpec, handler: H) -> RegistryResult<HandlerId> {
        self.inner.registry.register(spec, handler)
    }

    /// See [`HandlerRegistry::register_exact`].
    pub fn register_exact<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: impl Into<String>,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.inner.registry.register_exact(kind, pattern, handler)
    }

    /// See [`HandlerRegistry::register_prefix`].
    pub fn register_prefix<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: impl Into<String>,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.inner.registry.register_prefix(kind, pattern, handler)
    }

    /// See [`HandlerRegistry::register_contains`].
    pub fn register_contains<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: impl Into<String>,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.inner.registry.register_contains(kind, pattern, handler)
    }

    /// See [`HandlerRegistry::register_regexp`].
    pub fn register_regexp<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: &str,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.inner.registry.register_regexp(kind, pattern, handler)
    }

    /// See [`HandlerRegistry::register_predicate`].
    pub fn register_predicate<P, H>(&self, predicate: P, handler: H) -> RegistryResult<HandlerId>
    where
        P: Fn(&Update) -> bool + Send + Sync + 'static,
        H: Handler,
    {
        self.inner.registry.register_predicate(predicate, handler)
    }

    /// Removes a handler. Unknown ids are ignored.
    ///
    /// A step handler's id also drops that user's step data.
    pub fn unregister(&self, id: &HandlerId) -> bool {
        self.inner.steps.unregister_id(id) || self.inner.registry.unregister(id)
    }

    /// See [`StepHandlers::register`].
    pub fn register_step<H, T>(&self, user: UserId, handler: H, data: T) -> RegistryResult<HandlerId>
    where
        H: Handler,
        T: std::any::Any + Send + Sync,
    {
        self.inner.steps.register(user, handler, data)
    }

    /// See [`StepHandlers::data`].
    pub fn step_data(&self, user: UserId) -> Option<StepData> {
        self.inner.steps.data(user)
    }

    /// See [`StepHandlers::unregister`].
    pub fn unregister_step(&self, user: UserId) -> Option<StepData> {
        self.inner.steps.unregister(user)
    }

    /// Number of live handlers, step handlers included.
    pub fn handler_count(&self) -> usize {
        self.inner.registry.len()
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Returns the handlers matching `update`, the sender's step handler first.
    pub fn find_matches(&self, update: &Update) -> Vec<MatchedHandler> {
        let mut matches = self.inner.registry.find_matches(update);

        if let Some(step_id) = update.user_id().and_then(|u| self.inner.steps.handler_id(u))
            && let Some(pos) = matches.iter().position(|m| m.id() == &step_id)
            && pos > 0
        {
            let step = matches.remove(pos);
            matches.insert(0, step);
        }

        matches
    }

    /// Runs the handlers selected for `update` and reports what happened.
    pub async fn dispatch(&self, update: Update) -> DispatchOutcome {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            update_id = update.update_id,
            event_name = update.event_name()
        );
        self.dispatch_inner(Arc::new(update)).instrument(span).await
    }

    async fn dispatch_inner(&self, update: Arc<Update>) -> DispatchOutcome {
        let matches = self.find_matches(&update);
        let mut outcome = DispatchOutcome {
            matched: matches.len(),
            ..Default::default()
        };

        if matches.is_empty() {
            match &self.inner.default_handler {
                Some(handler) => {
                    trace!("No handler matched, running default handler");
                    outcome.invoked = 1;
                    if !self.invoke(&update, handler, None).await {
                        outcome.failed = 1;
                    }
                }
                None => trace!("No handler matched"),
            }
            return outcome;
        }

        let selected = match self.inner.policy {
            DispatchPolicy::FirstMatch => &matches[..1],
            DispatchPolicy::FanOut => &matches[..],
        };
        debug!(
            matched = outcome.matched,
            selected = selected.len(),
            policy = ?self.inner.policy,
            "Dispatching update"
        );

        for matched in selected {
            outcome.invoked += 1;
            if !self.invoke(&update, matched.handler(), Some(matched.id())).await {
                outcome.failed += 1;
            }
        }

        outcome
    }

    /// Runs one callback, containing any panic. Returns `false` on panic.
    async fn invoke(
        &self,
        update: &Arc<Update>,
        handler: &BoxedHandler,
        handler_id: Option<&HandlerId>,
    ) -> bool {
        let ctx = HandlerContext::new(Arc::clone(update), self.clone(), handler_id.cloned());
        let handler = Arc::clone(handler);

        trace!(handler_id = ?handler_id, "Invoking handler");
        let result = AssertUnwindSafe(async move { handler.call(ctx).await })
            .catch_unwind()
            .await;

        match result {
            Ok(()) => true,
            Err(_) => {
                error!(handler_id = ?handler_id, "Handler panicked");
                false
            }
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("handler_count", &self.handler_count())
            .field("active_steps", &self.inner.steps.len())
            .field("policy", &self.inner.policy)
            .field("default_handler", &self.inner.default_handler.is_some())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for Router {
    async fn dispatch(&self, update: Update) -> DispatchOutcome {
        Router::dispatch(self, update).await
    }
}

// ============================================================================
// Tower Service Implementation for Router
// ============================================================================

/// Lets tower middleware (timeouts, concurrency limits, ...) wrap a router.
impl Service<Update> for Router {
    type Response = DispatchOutcome;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, update: Update) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.dispatch(update).await) })
    }
}

// ============================================================================
// RouterBuilder
// ============================================================================

/// Builder for [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    policy: DispatchPolicy,
    ids: Option<BoxedIdGenerator>,
    default_handler: Option<BoxedHandler>,
}

impl RouterBuilder {
    /// Sets the dispatch policy.
    pub fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the id generator used for new handlers.
    pub fn id_generator(mut self, ids: BoxedIdGenerator) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Sets a handler run for updates nothing else matched.
    pub fn default_handler<H: Handler>(mut self, handler: H) -> Self {
        self.default_handler = Some(into_handler(handler));
        self
    }

    /// Like [`default_handler`](Self::default_handler), for an already boxed handler.
    pub fn boxed_default_handler(mut self, handler: BoxedHandler) -> Self {
        self.default_handler = Some(handler);
        self
    }

    /// Builds the router.
    pub fn build(self) -> Router {
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(RandomIdGenerator::default()));
        let registry = Arc::new(HandlerRegistry::with_id_generator(ids));

        Router {
            inner: Arc::new(RouterInner {
                steps: StepHandlers::new(Arc::clone(&registry)),
                registry,
                policy: self.policy,
                default_handler: self.default_handler,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use switchyard_core::{CallbackQuery, Message, User};
    use tower::ServiceExt;

    fn text_from(user: i64, text: &str) -> Update {
        Update::message(1, Message::text(1, User::new(user, "u"), text))
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(c: &Arc<AtomicUsize>) -> impl Handler {
        let c = Arc::clone(c);
        move |_ctx: HandlerContext| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_exact_start_scenario() {
        let router = Router::new();
        let hits = counter();
        router
            .register_exact(HandlerKind::MessageText, "/start", counting(&hits))
            .unwrap();

        let outcome = router.dispatch(text_from(1, "/start")).await;
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.invoked, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let outcome = router.dispatch(text_from(1, "/start ")).await;
        assert!(outcome.is_unhandled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_scenario_enforces_user() {
        let router = Router::new();
        let hits = counter();
        router
            .register_step(UserId(42), counting(&hits), json!({"stage": 1}))
            .unwrap();

        router.dispatch(text_from(42, "any text at all")).await;
        router.dispatch(text_from(42, "")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let outcome = router.dispatch(text_from(7, "any text at all")).await;
        assert!(outcome.is_unhandled());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let data = router.step_data(UserId(42)).unwrap();
        assert_eq!(*data.downcast::<Value>().unwrap(), json!({"stage": 1}));
    }

    #[tokio::test]
    async fn test_step_takes_precedence_under_first_match() {
        let router = Router::new();
        let general = counter();
        let step = counter();
        router
            .register_prefix(HandlerKind::MessageText, "/", counting(&general))
            .unwrap();
        let step_id = router.register_step(UserId(42), counting(&step), ()).unwrap();

        assert_eq!(router.find_matches(&text_from(42, "/help"))[0].id(), &step_id);

        let outcome = router.dispatch(text_from(42, "/help")).await;
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.invoked, 1);
        assert_eq!(step.load(Ordering::SeqCst), 1);
        assert_eq!(general.load(Ordering::SeqCst), 0);

        router.dispatch(text_from(7, "/help")).await;
        assert_eq!(general.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_step_id_clears_step_data() {
        let router = Router::new();
        let step_id = router
            .register_step(UserId(42), |_ctx: HandlerContext| async {}, 5u8)
            .unwrap();

        assert!(router.unregister(&step_id));
        assert!(router.step_data(UserId(42)).is_none());
        assert_eq!(router.handler_count(), 0);
        assert!(!router.unregister(&step_id));
        assert!(router.dispatch(text_from(42, "hi")).await.is_unhandled());
    }

    #[tokio::test]
    async fn test_fan_out_runs_all_in_order() {
        let router = Router::builder().policy(DispatchPolicy::FanOut).build();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            router
                .register_contains(HandlerKind::MessageText, "", move |_ctx: HandlerContext| {
                    let order = Arc::clone(&order);
                    async move { order.lock().push(label) }
                })
                .unwrap();
        }

        let outcome = router.dispatch(text_from(1, "x")).await;
        assert_eq!(outcome.invoked, 3);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_default_handler_runs_only_without_match() {
        let fallback = counter();
        let router = Router::builder()
            .default_handler(counting(&fallback))
            .build();
        router
            .register_exact(HandlerKind::CallbackData, "ok", |_ctx: HandlerContext| async {})
            .unwrap();

        let outcome = router.dispatch(text_from(1, "unknown")).await;
        assert_eq!(outcome.matched, 0);
        assert_eq!(outcome.invoked, 1);
        assert_eq!(fallback.load(Ordering::SeqCst), 1);

        let cb = Update::callback_query(5, CallbackQuery::new("q", User::new(1, "u"), "ok"));
        router.dispatch(cb).await;
        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let router = Router::builder().policy(DispatchPolicy::FanOut).build();
        let after = counter();
        router
            .register_contains(HandlerKind::MessageText, "", |_ctx: HandlerContext| async {
                if true {
                    panic!("boom");
                }
            })
            .unwrap();
        router
            .register_contains(HandlerKind::MessageText, "", counting(&after))
            .unwrap();

        let outcome = router.dispatch(text_from(1, "x")).await;
        assert_eq!(outcome.invoked, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);

        // Tables stay usable after the panic.
        router
            .register_exact(HandlerKind::MessageText, "/next", counting(&after))
            .unwrap();
        assert_eq!(router.handler_count(), 3);
    }

    #[tokio::test]
    async fn test_handler_reenters_router_for_multi_turn_flow() {
        let router = Router::new();
        let names = Arc::new(Mutex::new(Vec::<String>::new()));

        let sink = Arc::clone(&names);
        let read_name = move |ctx: HandlerContext| {
            let sink = Arc::clone(&sink);
            async move {
                let stage = ctx.step_data::<u8>().unwrap_or_default();
                sink.lock().push(format!("{}:{}", stage, ctx.text().unwrap_or_default()));
                ctx.unregister_step();
            }
        };

        router
            .register_exact(HandlerKind::MessageText, "/name", move |ctx: HandlerContext| {
                let read_name = read_name.clone();
                async move { ctx.register_step(read_name, 1u8).map(|_| ()) }
            })
            .unwrap();

        router.dispatch(text_from(42, "/name")).await;
        assert!(router.step_data(UserId(42)).is_some());

        router.dispatch(text_from(42, "Ada")).await;
        assert_eq!(*names.lock(), vec!["1:Ada".to_string()]);
        assert!(router.step_data(UserId(42)).is_none());
        assert_eq!(router.handler_count(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_logged_not_propagated() {
        let router = Router::new();
        router
            .register_contains(HandlerKind::MessageText, "", |_ctx: HandlerContext| async {
                Err::<(), _>("nope")
            })
            .unwrap();

        let outcome = router.dispatch(text_from(1, "x")).await;
        assert_eq!(outcome.invoked, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_tower_service() {
        let router = Router::new();
        let hits = counter();
        router
            .register_exact(HandlerKind::MessageText, "/ping", counting(&hits))
            .unwrap();

        let outcome = router.oneshot(text_from(1, "/ping")).await.unwrap();
        assert_eq!(outcome.invoked, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_via_trait_object() {
        let router = Router::new();
        let hits = counter();
        router
            .register_exact(HandlerKind::MessageText, "/x", counting(&hits))
            .unwrap();

        let dispatcher: switchyard_core::BoxedDispatcher = Arc::new(router);
        let outcome = tokio_test::block_on(dispatcher.dispatch(text_from(1, "/x")));
        assert_eq!(outcome.invoked, 1);
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        let policy: DispatchPolicy = serde_json::from_value(json!("fan_out")).unwrap();
        assert_eq!(policy, DispatchPolicy::FanOut);
    }
}
