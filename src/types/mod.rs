//! Shared data types
//!
//! Module identity and status snapshots exchanged over the transport, and
//! the user sessions that hold allocation claims.

mod module;
mod session;

pub use module::*;
pub use session::*;
