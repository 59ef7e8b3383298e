//! # Switchyard
//!
//! An update dispatch registry for chat bots.
//!
//! ## Overview
//!
//! Switchyard decides which registered callbacks run for each incoming
//! update. Handlers are registered against a matcher (exact text, prefix,
//! substring, regular expression or an arbitrary predicate), optionally
//! restricted to one user. Multi-turn conversations use step handlers: a
//! per-user callback that receives the next text message from that user
//! and takes precedence over general handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌──────────────┐     ┌────────┐     ┌──────────────────┐
//! │ Transport │────▶│ UpdateSender │────▶│ worker │────▶│ Router           │──▶ callbacks
//! │ (yours)   │     │ (queue)      │────▶│ worker │────▶│  ├ StepHandlers  │
//! └───────────┘     └──────────────┘     └────────┘     │  └ HandlerRegistry│
//!                                                       └──────────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging, the update queue and its workers
//! - **Router**: step precedence, dispatch policy, panic containment
//! - **HandlerRegistry**: the table of `(spec, callback)` entries
//! - **StepHandlers**: at most one step handler per user, with its state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchyard::prelude::*;
//!
//! async fn start(ctx: HandlerContext) {
//!     info!(user = ?ctx.user_id(), "Started");
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SwitchyardRuntime::new();
//!     runtime.router().register_exact(HandlerKind::MessageText, "/start", start)?;
//!
//!     spawn_poller(runtime.sender());
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `switchyard.toml` (default)
//! - `yaml-config`: load `switchyard.yaml`
//! - `json-log`: JSON log output

pub use switchyard_core as core;
pub use switchyard_framework as framework;
pub use switchyard_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use switchyard::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use switchyard_runtime::{SwitchyardRuntime, UpdateSender};

    // Routing and registration
    pub use switchyard_framework::{
        DispatchPolicy, HandlerContext, HandlerKind, HandlerSpec, MatchRule, RegistryError,
        Router, StepData,
    };

    // Event model
    pub use switchyard_core::{
        CallbackQuery, Chat, DispatchOutcome, Dispatcher, HandlerId, Message, Update, User,
        UserId,
    };

    // Logging macros
    pub use switchyard_runtime::prelude::*;
}
