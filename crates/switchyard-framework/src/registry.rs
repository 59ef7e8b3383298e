//! The handler registry.
//!
//! [`HandlerRegistry`] is a concurrent table of `id → (spec, handler)`
//! bindings. It is an ordinary owned value: every bot instance constructs its
//! own, so several bots in one process never share handlers.
//!
//! # Ordering
//!
//! Entries are kept in insertion order and [`find_matches`] returns matches
//! in that order.
//!
//! # Locking
//!
//! Mutations take the table's write lock for the duration of the mutation
//! only. [`find_matches`] takes the read lock just long enough to copy the
//! live entries (cheap `Arc` clones) and evaluates specs after releasing it,
//! so predicates and callbacks may re-enter the registry. The result reflects
//! the table as it was when the copy was taken; entries added or removed
//! afterwards are not observed by that call.
//!
//! [`find_matches`]: HandlerRegistry::find_matches

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use switchyard_core::{BoxedIdGenerator, HandlerId, RandomIdGenerator, Update};

use crate::error::{RegistryError, RegistryResult};
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::matcher::{HandlerKind, HandlerSpec};

/// Number of ids tried before giving up on a registration.
pub const MAX_ID_ATTEMPTS: usize = 8;

struct HandlerEntry {
    id: HandlerId,
    spec: HandlerSpec,
    handler: BoxedHandler,
}

/// A handler whose spec matched an update.
#[derive(Clone)]
pub struct MatchedHandler {
    id: HandlerId,
    handler: BoxedHandler,
}

impl MatchedHandler {
    /// Id of the matched handler.
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    /// The callback to invoke.
    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }
}

impl fmt::Debug for MatchedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedHandler")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Table {
    /// Insertion sequence → entry.
    entries: BTreeMap<u64, Arc<HandlerEntry>>,
    /// Handler id → insertion sequence.
    index: HashMap<HandlerId, u64>,
    next_seq: u64,
}

/// Concurrent table of registered handlers.
pub struct HandlerRegistry {
    table: RwLock<Table>,
    ids: BoxedIdGenerator,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry minting 16-character random ids.
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(RandomIdGenerator::default()))
    }

    /// Creates an empty registry using `ids` for identifiers.
    pub fn with_id_generator(ids: BoxedIdGenerator) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            ids,
        }
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers `handler` under `spec` and returns its fresh id.
    pub fn register<H: Handler>(&self, spec: HandlerSpec, handler: H) -> RegistryResult<HandlerId> {
        self.insert(spec, into_handler(handler))
    }

    /// Registers a handler firing when the field equals `pattern`.
    pub fn register_exact<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: impl Into<String>,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.register(HandlerSpec::exact(kind, pattern), handler)
    }

    /// Registers a handler firing when the field starts with `pattern`.
    pub fn register_prefix<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: impl Into<String>,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.register(HandlerSpec::prefix(kind, pattern), handler)
    }

    /// Registers a handler firing when the field contains `pattern`.
    pub fn register_contains<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: impl Into<String>,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.register(HandlerSpec::contains(kind, pattern), handler)
    }

    /// Registers a handler firing when `pattern` matches anywhere in the field.
    ///
    /// The pattern is compiled here; a bad pattern is reported immediately.
    pub fn register_regexp<H: Handler>(
        &self,
        kind: HandlerKind,
        pattern: &str,
        handler: H,
    ) -> RegistryResult<HandlerId> {
        self.register(HandlerSpec::regexp(kind, pattern)?, handler)
    }

    /// Registers a handler firing when `predicate` returns `true`.
    pub fn register_predicate<P, H>(&self, predicate: P, handler: H) -> RegistryResult<HandlerId>
    where
        P: Fn(&Update) -> bool + Send + Sync + 'static,
        H: Handler,
    {
        self.register(HandlerSpec::predicate(predicate), handler)
    }

    /// Inserts an already boxed handler.
    pub fn insert(&self, spec: HandlerSpec, handler: BoxedHandler) -> RegistryResult<HandlerId> {
        let mut table = self.table.write();

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.ids.next_id();
            if table.index.contains_key(&id) {
                warn!(handler_id = %id, attempt, "Handler id collision, regenerating");
                continue;
            }

            let seq = table.next_seq;
            table.next_seq += 1;
            table.index.insert(id.clone(), seq);

            debug!(
                handler_id = %id,
                kind = ?spec.kind(),
                mode = spec.rule().mode(),
                user = ?spec.restrict_user(),
                "Handler registered"
            );

            table.entries.insert(
                seq,
                Arc::new(HandlerEntry {
                    id: id.clone(),
                    spec,
                    handler,
                }),
            );
            return Ok(id);
        }

        error!(
            attempts = MAX_ID_ATTEMPTS,
            "Id generator kept producing live ids, registration aborted"
        );
        Err(RegistryError::IdentifierExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    // ─── Removal ─────────────────────────────────────────────────────────────

    /// Removes the handler with `id`.
    ///
    /// Returns `false` if no such handler was registered; that is not an error.
    pub fn unregister(&self, id: &HandlerId) -> bool {
        let mut table = self.table.write();
        match table.index.remove(id) {
            Some(seq) => {
                table.entries.remove(&seq);
                debug!(handler_id = %id, "Handler unregistered");
                true
            }
            None => {
                trace!(handler_id = %id, "Unregister of unknown handler ignored");
                false
            }
        }
    }

    /// Removes every handler.
    pub fn clear(&self) {
        let mut table = self.table.write();
        table.entries.clear();
        table.index.clear();
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    /// Returns every handler whose spec matches `update`, in insertion order.
    pub fn find_matches(&self, update: &Update) -> Vec<MatchedHandler> {
        let snapshot: Vec<Arc<HandlerEntry>> = self.table.read().entries.values().cloned().collect();

        snapshot
            .into_iter()
            .filter(|entry| Self::spec_matches(entry, update))
            .map(|entry| MatchedHandler {
                id: entry.id.clone(),
                handler: Arc::clone(&entry.handler),
            })
            .collect()
    }

    /// Evaluates one entry's spec. A panicking predicate counts as a non-match.
    fn spec_matches(entry: &HandlerEntry, update: &Update) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| entry.spec.matches(update))) {
            Ok(matched) => matched,
            Err(_) => {
                error!(handler_id = %entry.id, "Match predicate panicked, skipping handler");
                false
            }
        }
    }

    /// Returns `true` if a handler with `id` is registered.
    pub fn contains(&self, id: &HandlerId) -> bool {
        self.table.read().index.contains_key(id)
    }

    /// Returns the spec registered under `id`.
    pub fn spec(&self, id: &HandlerId) -> Option<HandlerSpec> {
        let table = self.table.read();
        let seq = table.index.get(id)?;
        table.entries.get(seq).map(|entry| entry.spec.clone())
    }

    /// Ids of all live handlers, in insertion order.
    pub fn ids(&self) -> Vec<HandlerId> {
        self.table
            .read()
            .entries
            .values()
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Number of live handlers.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.len())
            .finish()
    }
}
