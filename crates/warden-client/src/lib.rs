pub mod batch;
pub mod client;
pub mod config;
pub mod conversions;
pub mod error;
pub mod traits;

pub use batch::{BatchChecker, DEFAULT_MAX_CONCURRENT_CHECKS};
pub use client::BackendClient;
pub use config::ClientOptions;
pub use error::ClientError;
pub use traits::{PermissionChecker, RelationManager};
