//! Protocol module for module-to-module communication
//!
//! Defines the typed payloads exchanged over the transport and the envelope
//! that carries them. How envelopes are encoded on a wire is left to the
//! transport.

mod messages;
mod version;

pub use messages::*;
pub use version::*;
