//! Health-aware JSON-RPC endpoint router.
//!
//! Routes calls across a fixed set of RPC endpoints, opens a circuit on
//! endpoints that keep failing, races latency-sensitive calls across the
//! healthiest endpoints and caches results for a bounded time.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod registry;
pub mod selector;
pub mod transport;

pub use cache::ResponseCache;
pub use config::RouterConfig;
pub use error::{EndpointFailure, RouterError};
pub use executor::{RequestExecutor, RequestOptions, MAX_SEQUENTIAL_ATTEMPTS};
pub use health::{EndpointSnapshot, HealthTracker};
pub use registry::{Endpoint, EndpointMetrics, EndpointRegistry};
pub use selector::Selector;
pub use transport::{HttpTransport, Transport};
