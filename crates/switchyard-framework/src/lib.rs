//! # Switchyard Framework
//!
//! Handler registration, matching and routing for inbound updates.
//!
//! This layer provides:
//! - [`HandlerSpec`]: the rule deciding whether a handler wants an update
//! - [`HandlerRegistry`]: the concurrent table of registered handlers
//! - [`StepHandlers`]: at most one conversation-step handler per user
//! - [`Router`]: step precedence, dispatch policy and callback invocation
//!
//! ```rust,ignore
//! use switchyard_framework::{HandlerContext, HandlerKind, Router};
//!
//! async fn start(ctx: HandlerContext) -> Result<(), RegistryError> {
//!     ctx.register_step(read_name, Stage::AskName)?;
//!     Ok(())
//! }
//!
//! let router = Router::new();
//! router.register_exact(HandlerKind::MessageText, "/start", start)?;
//! router.dispatch(update).await;
//! ```

pub mod error;
pub mod handler;
pub mod matcher;
pub mod registry;
pub mod router;
pub mod step;

pub use error::{RegistryError, RegistryResult};
pub use handler::{BoxedHandler, Handler, HandlerContext, HandlerResponse, into_handler};
pub use matcher::{HandlerKind, HandlerSpec, MatchRule, PredicateFn};
pub use registry::{HandlerRegistry, MAX_ID_ATTEMPTS, MatchedHandler};
pub use router::{DispatchPolicy, Router, RouterBuilder};
pub use step::{StepData, StepHandlers};
