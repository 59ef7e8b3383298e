//! Per-user step handlers.
//!
//! A step handler means "the next text message from this user continues the
//! conversation". [`StepHandlers`] layers a per-user index over the
//! [`HandlerRegistry`] and guarantees at most one live step per user, along
//! with an arbitrary [`StepData`] payload carried between turns.
//!
//! ```text
//!            register                register (old entry removed)
//!   NoStep ───────────▶ HasStep ───────────────────────────┐
//!     ▲  │                  │  ▲                           │
//!     │  └── unregister ──┐ │  └───────────────────────────┘
//!     │      (no-op)      │ │
//!     └───────────────────┘ └── unregister ──▶ NoStep
//! ```
//!
//! The step entry in the registry matches every text message from the user
//! (`Contains("")` restricted to the user id). Its pattern carries no meaning;
//! only the user restriction does.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use switchyard_core::{HandlerId, UserId};

use crate::error::{RegistryError, RegistryResult};
use crate::handler::{Handler, into_handler};
use crate::matcher::{HandlerKind, HandlerSpec};
use crate::registry::HandlerRegistry;

// ============================================================================
// StepData
// ============================================================================

/// Opaque state attached to a step.
///
/// Any `Send + Sync` value can be stored; read it back with
/// [`downcast`](Self::downcast).
#[derive(Clone)]
pub struct StepData(Arc<dyn Any + Send + Sync>);

impl StepData {
    /// Wraps `value`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns a shared handle to the value if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Borrows the value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns `true` if the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for StepData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepData(..)")
    }
}

// ============================================================================
// StepHandlers
// ============================================================================

struct StepBinding {
    handler_id: HandlerId,
    data: StepData,
}

/// Index of active step handlers, one per user.
///
/// A single mutex serializes all step operations. It is held across the
/// whole "read binding, mutate registry, write binding" sequence; the
/// registry's own lock nests strictly inside it, never the other way round.
pub struct StepHandlers {
    registry: Arc<HandlerRegistry>,
    bindings: Mutex<HashMap<UserId, StepBinding>>,
}

impl StepHandlers {
    /// Creates an empty index over `registry`.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// The registry step entries are stored in.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Makes `handler` the active step for `user`, storing `data` with it.
    ///
    /// A previous step for `user` is removed first, both its registry entry
    /// and its data. `UserId(0)` is rejected since it would leave the entry
    /// unrestricted.
    pub fn register<H, T>(&self, user: UserId, handler: H, data: T) -> RegistryResult<HandlerId>
    where
        H: Handler,
        T: Any + Send + Sync,
    {
        if user.get() == 0 {
            return Err(RegistryError::invalid_spec(
                "step handlers require a nonzero user id",
            ));
        }

        let handler = into_handler(handler);
        let spec = HandlerSpec::contains(HandlerKind::MessageText, "").for_user(user);

        let mut bindings = self.bindings.lock();
        if let Some(previous) = bindings.remove(&user) {
            self.registry.unregister(&previous.handler_id);
            debug!(user = %user, replaced = %previous.handler_id, "Step handler replaced");
        }

        let handler_id = self.registry.insert(spec, handler)?;
        bindings.insert(
            user,
            StepBinding {
                handler_id: handler_id.clone(),
                data: StepData::new(data),
            },
        );
        debug!(user = %user, handler_id = %handler_id, "Step handler registered");

        Ok(handler_id)
    }

    /// Step data stored for `user`.
    pub fn data(&self, user: UserId) -> Option<StepData> {
        self.bindings.lock().get(&user).map(|b| b.data.clone())
    }

    /// Registry id of `user`'s active step handler.
    pub fn handler_id(&self, user: UserId) -> Option<HandlerId> {
        self.bindings.lock().get(&user).map(|b| b.handler_id.clone())
    }

    /// Removes `user`'s step, returning its data. `None` if there was none.
    pub fn unregister(&self, user: UserId) -> Option<StepData> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.remove(&user)?;
        self.registry.unregister(&binding.handler_id);
        debug!(user = %user, handler_id = %binding.handler_id, "Step handler unregistered");
        Some(binding.data)
    }

    /// Removes the step whose registry entry is `handler_id`.
    ///
    /// Returns `false` if no step uses that id.
    pub fn unregister_id(&self, handler_id: &HandlerId) -> bool {
        let mut bindings = self.bindings.lock();
        let Some(user) = bindings
            .iter()
            .find_map(|(user, b)| (&b.handler_id == handler_id).then_some(*user))
        else {
            return false;
        };
        bindings.remove(&user);
        self.registry.unregister(handler_id);
        debug!(user = %user, handler_id = %handler_id, "Step handler unregistered by id");
        true
    }

    /// Number of users with an active step.
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Returns `true` if no user has an active step.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for StepHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHandlers")
            .field("active_steps", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use serde_json::{Value, json};
    use switchyard_core::{Message, Update, User};

    use crate::handler::HandlerContext;

    async fn noop(_ctx: HandlerContext) {}

    fn steps() -> StepHandlers {
        StepHandlers::new(Arc::new(HandlerRegistry::new()))
    }

    fn text_from(user: i64, text: &str) -> Update {
        Update::message(1, Message::text(1, User::new(user, "u"), text))
    }

    #[test]
    fn test_register_then_read_data() {
        let steps = steps();
        steps.register(UserId(42), noop, json!({"stage": 1})).unwrap();

        let data = steps.data(UserId(42)).unwrap();
        assert_eq!(*data.downcast::<Value>().unwrap(), json!({"stage": 1}));
        assert!(data.is::<Value>());
        assert!(data.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_reregister_replaces_entry_and_data() {
        let steps = steps();
        let first = steps.register(UserId(42), noop, 1u32).unwrap();
        let second = steps.register(UserId(42), noop, 2u32).unwrap();

        let registry = steps.registry();
        assert!(!registry.contains(&first));
        assert!(registry.contains(&second));
        assert_eq!(registry.len(), 1);
        assert_eq!(steps.handler_id(UserId(42)), Some(second));
        assert_eq!(steps.data(UserId(42)).unwrap().downcast_ref::<u32>(), Some(&2));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let steps = steps();
        steps.register(UserId(42), noop, "last").unwrap();

        let data = steps.unregister(UserId(42)).unwrap();
        assert_eq!(data.downcast_ref::<&str>(), Some(&"last"));
        assert!(steps.data(UserId(42)).is_none());
        assert!(steps.unregister(UserId(42)).is_none());
        assert!(steps.registry().is_empty());
    }

    #[test]
    fn test_unregister_by_handler_id() {
        let steps = steps();
        let id = steps.register(UserId(42), noop, 1u32).unwrap();
        let other = steps.register(UserId(7), noop, 2u32).unwrap();

        assert!(steps.unregister_id(&id));
        assert!(steps.data(UserId(42)).is_none());
        assert!(!steps.registry().contains(&id));
        assert!(!steps.unregister_id(&id));
        assert_eq!(steps.handler_id(UserId(7)), Some(other));
    }

    #[test]
    fn test_unregister_without_step_is_noop() {
        let steps = steps();
        assert!(steps.unregister(UserId(5)).is_none());
        assert!(steps.is_empty());
    }

    #[test]
    fn test_step_entry_is_user_scoped_catch_all() {
        let steps = steps();
        let id = steps.register(UserId(42), noop, ()).unwrap();
        let registry = steps.registry();

        let matches = registry.find_matches(&text_from(42, "literally anything"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id(), &id);

        assert!(registry.find_matches(&text_from(7, "literally anything")).is_empty());
    }

    #[test]
    fn test_users_are_independent() {
        let steps = steps();
        steps.register(UserId(1), noop, "a").unwrap();
        steps.register(UserId(2), noop, "b").unwrap();
        steps.unregister(UserId(1));

        assert!(steps.data(UserId(1)).is_none());
        assert_eq!(steps.data(UserId(2)).unwrap().downcast_ref::<&str>(), Some(&"b"));
        assert_eq!(steps.len(), 1);
        assert_eq!(steps.registry().len(), 1);
    }

    #[test]
    fn test_zero_user_rejected() {
        let steps = steps();
        let result = steps.register(UserId(0), noop, ());
        assert!(matches!(result, Err(RegistryError::InvalidSpec { .. })));
        assert!(steps.registry().is_empty());
    }

    #[test]
    fn test_concurrent_register_same_user_leaves_one_entry() {
        let steps = Arc::new(steps());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let steps = Arc::clone(&steps);
                thread::spawn(move || {
                    for j in 0..50 {
                        steps.register(UserId(42), noop, i * 100 + j).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(steps.len(), 1);
        assert_eq!(steps.registry().len(), 1);
        let live = steps.handler_id(UserId(42)).unwrap();
        assert!(steps.registry().contains(&live));
    }
}
