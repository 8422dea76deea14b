//! Consent Ledger and Access Gate

pub mod gate;
pub mod grant;
pub mod ledger;
pub mod policy;

pub use gate::{AccessDecision, AccessGate, AccessOutcome};
pub use grant::{ConsentGrant, DataModule, GrantStatus};
pub use ledger::{ConsentLedger, ConsentLookup, Revocation};
pub use policy::{Tier, TierPolicy, TierRule};
