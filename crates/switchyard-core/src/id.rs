//! Handler identifiers and the sources that mint them.
//!
//! A [`HandlerId`] is the only handle external code keeps to a registered
//! handler. Ids are random alphanumeric tokens produced by an
//! [`IdGenerator`]; the generator is injectable so tests can use
//! [`SeededIdGenerator`] and get the same ids on every run.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default length of generated handler ids.
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Opaque identifier of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Arc<str>);

impl HandlerId {
    /// Wraps an existing token. Mostly useful in tests and for ids read back
    /// from application storage.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for HandlerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source of fresh handler identifiers.
///
/// Implementations only need to make collisions improbable; the registry
/// detects and retries the rare duplicate.
pub trait IdGenerator: Send + Sync {
    /// Produces the next identifier.
    fn next_id(&self) -> HandlerId;
}

/// Shared, type-erased id generator.
pub type BoxedIdGenerator = Arc<dyn IdGenerator>;

/// Generates alphanumeric ids from the thread-local RNG.
#[derive(Debug, Clone, Copy)]
pub struct RandomIdGenerator {
    len: usize,
}

impl RandomIdGenerator {
    /// Creates a generator producing ids of `len` characters.
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> HandlerId {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect();
        HandlerId::new(token)
    }
}

/// Deterministic generator driven by a seeded [`StdRng`].
pub struct SeededIdGenerator {
    rng: Mutex<StdRng>,
    len: usize,
}

impl SeededIdGenerator {
    /// Creates a generator whose sequence is fully determined by `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            len: DEFAULT_ID_LENGTH,
        }
    }

    /// Overrides the id length.
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }
}

impl IdGenerator for SeededIdGenerator {
    fn next_id(&self) -> HandlerId {
        let mut rng = self.rng.lock();
        let token: String = (&mut *rng)
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect();
        HandlerId::new(token)
    }
}

impl fmt::Debug for SeededIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededIdGenerator")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
