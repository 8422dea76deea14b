//! Consent grant model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::consent::policy::Tier;
use crate::error::ConsentError;

/// Citizen data domain a grant can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataModule {
    Identity,
    Health,
    Financial,
    Property,
    Assets,
}

impl DataModule {
    pub const ALL: [DataModule; 5] = [
        DataModule::Identity,
        DataModule::Health,
        DataModule::Financial,
        DataModule::Property,
        DataModule::Assets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataModule::Identity => "identity",
            DataModule::Health => "health",
            DataModule::Financial => "financial",
            DataModule::Property => "property",
            DataModule::Assets => "assets",
        }
    }
}

impl fmt::Display for DataModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataModule {
    type Err = ConsentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(DataModule::Identity),
            "health" => Ok(DataModule::Health),
            "financial" => Ok(DataModule::Financial),
            "property" => Ok(DataModule::Property),
            "assets" => Ok(DataModule::Assets),
            other => Err(ConsentError::ValidationError(format!(
                "Unknown data module: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Expired,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Expired => "expired",
            GrantStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub grant_id: String,
    pub citizen_id: String,
    pub requester_id: String,
    pub requester_name: String,
    pub tier: Tier,
    pub modules: BTreeSet<DataModule>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Stored status. Expiry is not written back until the pair is next
    /// mutated, so readers should use [`ConsentGrant::status_at`].
    pub status: GrantStatus,
}

impl ConsentGrant {
    /// Effective status at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> GrantStatus {
        match self.status {
            GrantStatus::Revoked => GrantStatus::Revoked,
            _ if self.revoked_at.is_some() => GrantStatus::Revoked,
            _ if now >= self.expires_at => GrantStatus::Expired,
            status => status,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == GrantStatus::Active
    }

    pub fn covers(&self, module: DataModule) -> bool {
        self.modules.contains(&module)
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.as_str()).collect()
    }
}
