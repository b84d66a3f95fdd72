//! Shared types for the Gatekeeper workspace: error taxonomy, configuration,
//! data model, and path resolution used by every component crate.

pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod paths;

pub use config::GatewayConfig;
pub use error::{ErrorCode, ErrorResponse, GatewayError, Result};
pub use ids::{new_id, now};
pub use model::{Action, Classification, Tier};
pub use paths::GatewayPaths;
