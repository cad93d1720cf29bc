//! API surface of the admission layer
//!
//! Error rendering shared by every middleware, plus the identity echo routes
//! the server mounts.

mod error;
mod handlers;

pub use error::*;
pub use handlers::*;
