//! Switchyard Runtime - orchestration layer for the Switchyard dispatch registry.
//!
//! This crate provides:
//! - Layered configuration (`SwitchyardConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`)
//! - A worker-pool runtime feeding queued updates to a `Router`
//!   (`SwitchyardRuntime`, `UpdateSender`)
//!
//! ```ignore
//! use switchyard_runtime::SwitchyardRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SwitchyardRuntime::new();
//!     runtime.router().register_exact(HandlerKind::MessageText, "/start", start)?;
//!
//!     // Hand the sender to whatever receives updates from the platform
//!     spawn_poller(runtime.sender());
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, DispatchConfig, LoggingConfig, RuntimeConfig,
    SwitchyardConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, RuntimeStats, SwitchyardRuntime, UpdateSender};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
