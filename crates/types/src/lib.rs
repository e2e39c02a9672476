//! Core types for the fleetload command simulator.
//!
//! Shared by the spammer library and test helpers: command kinds and their
//! wire versions, host identifiers, the JSON document type, and the Blake3
//! hash used for deterministic seeding.

mod document;
mod hash;
mod identifiers;

pub use document::{
    certname, set_certname, values, values_mut, Document, CERTNAME_KEY, PRODUCER_TIMESTAMP_KEY,
    VALUES_KEY,
};
pub use hash::Hash;
pub use identifiers::{CommandKind, HostId, UnknownKind};
