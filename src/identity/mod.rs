//! Identity Registry

pub mod registry;

pub use registry::{
    derive_did, normalize_national_id, CitizenIdentity, Demographics, IdentityRegistry, Registration,
};
