//! Chat session core
//!
//! - [`state`] - Session status and the observable snapshot store
//! - [`connection`] - Broker connection lifecycle over a [`Transport`](crate::transport::Transport)
//! - [`pipeline`] - Outbound send and inbound intake decisions
//! - [`facade`] - [`ChatSession`] handle and the actor behind it

pub mod connection;
pub mod facade;
pub mod pipeline;
pub mod state;

pub use connection::{BrokerSettings, ConnectionManager};
pub use facade::{ChatSession, SessionCommand, SessionSettings};
pub use pipeline::{IgnoreReason, IntakeOutcome, SendRejection};
pub use state::{SessionSnapshot, SessionStatus, SessionStore};
