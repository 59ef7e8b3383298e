//! # Switchyard Core
//!
//! Shared building blocks for the Switchyard update dispatch registry.
//!
//! - **Update model**: [`Update`], [`Message`], [`CallbackQuery`], [`UserId`]
//! - **Identifiers**: [`HandlerId`] and the injectable [`IdGenerator`]
//! - **Dispatch seam**: the [`Dispatcher`] trait consumed by ingestion layers
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌───────────┐
//! │  Transport  │────▶│ Dispatcher │────▶│  Handler  │
//! │ (external)  │     │  (Router)  │────▶│  Handler  │
//! └─────────────┘     └────────────┘     └───────────┘
//! ```

pub mod dispatcher;
pub mod id;
pub mod update;

pub use dispatcher::{BoxedDispatcher, DispatchOutcome, Dispatcher};
pub use id::{
    BoxedIdGenerator, DEFAULT_ID_LENGTH, HandlerId, IdGenerator, RandomIdGenerator,
    SeededIdGenerator,
};
pub use update::{CallbackQuery, Chat, Message, Update, UpdateKind, User, UserId};
