//! Chat protocol: message types, wire codec and topic rules

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::{decode, encode, DecodeError};
pub use messages::*;
pub use topics::*;
