//! Leaseq server components
//!
//! Split from the binary so integration tests can run the same router
//! in-process.

pub mod config;
pub mod router;
pub mod sweep;

pub use self::config::Config;
pub use router::{build_state, create_router};
pub use sweep::spawn_expiry_sweep;
