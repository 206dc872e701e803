//! # tandem-core
//!
//! Shared vocabulary for the Tandem workspace: branded ids, the persisted
//! domain model, the error taxonomy, and the typed realtime event surface.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod models;

pub use errors::{ChatError, ErrorClass};
pub use ids::{ConnectionId, MessageId, RequestId, TransportId, UserId};
