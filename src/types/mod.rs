//! Core domain types for the relay.
//!
//! Records flow from the resolver through the differ into the store and the
//! delivery channel; these types are shared by all of them.

pub mod ids;
pub mod record;

pub use ids::Identity;
pub use record::{DeliveryRecord, DeliveryStatus, Field, Fields, Record};
