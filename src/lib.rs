//! # respool
//!
//! Thread-safe resource pool for expensive-to-create resources such as
//! connections, buffers, or workers, shared across concurrent callers.
//!
//! ## Features
//!
//! - Lazy resource creation up to a runtime-adjustable ceiling
//! - Blocking acquire with FIFO hand-off to waiting callers
//! - Cooperative per-call cancellation, including of a blocked wait
//! - Orderly shutdown: idle resources reclaimed immediately, in-use ones
//!   as they come back
//! - Automatic return of resources via RAII (Drop trait)
//! - Async acquire on top of tokio
//! - Metrics with Prometheus export
//! - Pool warm-up/pre-population
//!
//! ## Quick Start
//!
//! ```rust
//! use respool::{CancelToken, Pool};
//!
//! let pool = Pool::<u32, &str>::new(|| Ok(42), |_| Ok(()));
//!
//! let res = pool.get(&CancelToken::never()).unwrap();
//! assert_eq!(*res, 42);
//! // Resource automatically returned when `res` goes out of scope
//! ```
//!
//! The `create` and `destroy` callbacks are the pool's only view of the
//! resource type. Creation errors are propagated verbatim to the caller of
//! [`Pool::get`]; destroy errors are swallowed and surface only as a
//! metrics counter.

mod cancel;
mod config;
mod errors;
mod metrics;
mod pool;

pub use cancel::{cancellation, CancelToken, Canceller};
pub use config::PoolConfig;
pub use errors::{PoolError, PoolResult};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{Pool, Pooled, Status};
