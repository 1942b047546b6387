//! Session allocation
//!
//! Tracks which sessions hold a claim on a module instance, decides
//! capacity per module policy, and runs the request/reply negotiation.

mod negotiator;
mod policy;
mod status;

pub use negotiator::*;
pub use policy::*;
pub use status::*;
