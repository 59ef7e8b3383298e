//! Handler callbacks.
//!
//! A handler is any async function taking a [`HandlerContext`]:
//!
//! ```rust,ignore
//! use switchyard_framework::HandlerContext;
//!
//! async fn start(ctx: HandlerContext) {
//!     tracing::info!(user = ?ctx.user_id(), "conversation started");
//! }
//!
//! // Fallible handlers are fine too; errors are logged by the router.
//! async fn ask_name(ctx: HandlerContext) -> Result<(), String> {
//!     ctx.register_step(read_name, Stage::Name).map_err(|e| e.to_string())?;
//!     Ok(())
//! }
//! ```
//!
//! The context gives access to the update and to the [`Router`] that invoked
//! the handler, so a callback may register or remove handlers (including its
//! own step handler) while running. No registry lock is held during the call.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::error;

use switchyard_core::{HandlerId, Update, UserId};

use crate::error::{RegistryError, RegistryResult};
use crate::router::Router;
use crate::step::StepData;

// ============================================================================
// HandlerContext
// ============================================================================

/// Everything a handler callback receives.
///
/// Cheap to clone: the update and the router are both reference-counted.
#[derive(Clone)]
pub struct HandlerContext {
    update: Arc<Update>,
    router: Router,
    handler_id: Option<HandlerId>,
}

impl HandlerContext {
    /// Creates a context. `handler_id` is `None` for the default handler.
    pub fn new(update: Arc<Update>, router: Router, handler_id: Option<HandlerId>) -> Self {
        Self {
            update,
            router,
            handler_id,
        }
    }

    /// The update being handled.
    pub fn update(&self) -> &Update {
        &self.update
    }

    /// Shared handle to the update being handled.
    pub fn update_arc(&self) -> Arc<Update> {
        Arc::clone(&self.update)
    }

    /// The router that dispatched this update.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Id of the registered handler being invoked.
    pub fn handler_id(&self) -> Option<&HandlerId> {
        self.handler_id.as_ref()
    }

    /// The user the update originated from.
    pub fn user_id(&self) -> Option<UserId> {
        self.update.user_id()
    }

    /// Message text, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        self.update.text()
    }

    /// Callback data, if this is a callback interaction.
    pub fn callback_data(&self) -> Option<&str> {
        self.update.callback_data()
    }

    /// Step data stored for the originating user, downcast to `T`.
    pub fn step_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.router.step_data(self.user_id()?)?.downcast::<T>()
    }

    /// Makes `handler` the next step for the originating user, replacing any
    /// step already registered for them.
    pub fn register_step<H, T>(&self, handler: H, data: T) -> RegistryResult<HandlerId>
    where
        H: Handler,
        T: Any + Send + Sync,
    {
        let user = self
            .user_id()
            .ok_or_else(|| RegistryError::invalid_spec("update has no originating user"))?;
        self.router.register_step(user, handler, data)
    }

    /// Ends the originating user's step, returning its data.
    pub fn unregister_step(&self) -> Option<StepData> {
        self.router.unregister_step(self.user_id()?)
    }
}

// ============================================================================
// HandlerResponse
// ============================================================================

/// Return types a handler may produce.
pub trait HandlerResponse: Send {
    /// Consumes the value once the handler finished.
    fn into_response(self, handler_id: Option<&HandlerId>);
}

impl HandlerResponse for () {
    fn into_response(self, _handler_id: Option<&HandlerId>) {}
}

impl<T: HandlerResponse> HandlerResponse for Option<T> {
    fn into_response(self, handler_id: Option<&HandlerId>) {
        if let Some(t) = self {
            t.into_response(handler_id);
        }
    }
}

/// On `Err`, the error is logged and dispatch continues.
impl<T: HandlerResponse, E: Display + Send> HandlerResponse for Result<T, E> {
    fn into_response(self, handler_id: Option<&HandlerId>) {
        match self {
            Ok(t) => t.into_response(handler_id),
            Err(e) => {
                let handler = handler_id.map_or("default", HandlerId::as_str);
                error!(handler_id = %handler, "Handler error: {e}");
            }
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

/// An invokable handler callback.
///
/// Implemented for every `Fn(HandlerContext) -> impl Future` whose output
/// implements [`HandlerResponse`].
pub trait Handler: Send + Sync + 'static {
    /// Runs the callback for one update.
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, ()>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerResponse,
{
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, ()> {
        let handler_id = ctx.handler_id.clone();
        let fut = self(ctx);
        Box::pin(async move {
            fut.await.into_response(handler_id.as_ref());
        })
    }
}

/// A shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Erases a handler's concrete type.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}
