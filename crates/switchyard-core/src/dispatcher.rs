//! The seam between update ingestion and handler routing.
//!
//! The transport layer only knows about [`Dispatcher`]: it deserializes an
//! [`Update`] and hands it over. Which handlers run, and how many, is decided
//! by the implementation (see `switchyard_framework::Router`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::update::Update;

/// Summary of what happened to a dispatched update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Number of registered handlers whose spec matched the update.
    pub matched: usize,
    /// Number of callbacks actually invoked (including a default handler).
    pub invoked: usize,
    /// Number of invoked callbacks that panicked.
    pub failed: usize,
}

impl DispatchOutcome {
    /// Returns `true` when no registered handler matched.
    pub fn is_unhandled(&self) -> bool {
        self.matched == 0
    }
}

/// Update dispatcher: receives inbound updates and routes them to handlers.
///
/// Use `Arc<dyn Dispatcher>` to share one dispatcher across ingestion workers.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Routes `update` to the matching handlers and waits for them to finish.
    async fn dispatch(&self, update: Update) -> DispatchOutcome;
}

/// Shared, type-erased dispatcher.
pub type BoxedDispatcher = Arc<dyn Dispatcher>;
