//! Tier policy table
//!
//! Maps each requester tier to the rule the access gate applies. The rule
//! semantics are fixed; which tier gets which rule, the government entity
//! list and the regulated-sector keywords are data and can be loaded from YAML.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ConsentError;

/// Trust classification of a data requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Government,
    Regulated,
    Commercial,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Government => "government",
            Tier::Regulated => "regulated",
            Tier::Commercial => "commercial",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConsentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "government" => Ok(Tier::Government),
            "regulated" => Ok(Tier::Regulated),
            "commercial" => Ok(Tier::Commercial),
            _ => Err(ConsentError::ValidationError(format!("Unknown tier: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TierRule {
    /// Allow unconditionally, auditing with the given reason.
    AlwaysAllow { reason: String },
    /// Allow only under an active, unexpired, unrevoked consent grant.
    RequireConsent,
    /// Never release raw data; only the proof-stub path may succeed.
    ProofOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
    pub rules: BTreeMap<Tier, TierRule>,
    #[serde(default)]
    pub government_entities: BTreeSet<String>,
    #[serde(default)]
    pub regulated_keywords: Vec<String>,
}

pub const GOVERNMENT_ACCESS_REASON: &str = "government-access";

impl Default for TierPolicy {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            Tier::Government,
            TierRule::AlwaysAllow {
                reason: GOVERNMENT_ACCESS_REASON.to_string(),
            },
        );
        rules.insert(Tier::Regulated, TierRule::RequireConsent);
        rules.insert(Tier::Commercial, TierRule::ProofOnly);

        let government_entities = [
            "UIDAI",
            "INCOME_TAX_DEPT",
            "SUPREME_COURT",
            "HIGH_COURT",
            "DISTRICT_COURT",
            "CBI",
            "ED",
            "SEBI",
            "RBI",
            "ELECTION_COMMISSION",
            "MCA",
            "GST_COUNCIL",
            "SUBREGISTRAR_OFFICE",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let regulated_keywords = ["BANK", "HOSPITAL", "INSURANCE", "NBFC", "CLINIC"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Self {
            rules,
            government_entities,
            regulated_keywords,
        }
    }
}

impl TierPolicy {
    pub fn rule_for(&self, tier: Tier) -> Option<&TierRule> {
        self.rules.get(&tier)
    }

    /// Classify a requester identifier into a tier.
    ///
    /// Exact government entity ids win; otherwise any regulated-sector keyword
    /// in the id marks it regulated; everything else is commercial.
    pub fn classify(&self, requester_id: &str) -> Tier {
        let rid = requester_id.trim().to_ascii_uppercase();
        if self.government_entities.contains(&rid) {
            return Tier::Government;
        }
        if self
            .regulated_keywords
            .iter()
            .any(|keyword| rid.contains(&keyword.to_ascii_uppercase()))
        {
            return Tier::Regulated;
        }
        Tier::Commercial
    }

    /// Bring entity ids and keywords to the trimmed upper-case form that
    /// [`classify`](Self::classify) compares against.
    pub fn normalized(mut self) -> Self {
        self.government_entities = self
            .government_entities
            .iter()
            .map(|e| e.trim().to_ascii_uppercase())
            .collect();
        for keyword in self.regulated_keywords.iter_mut() {
            *keyword = keyword.trim().to_ascii_uppercase();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConsentError> {
        if self.rules.is_empty() {
            return Err(ConsentError::ConfigError("Tier policy defines no rules".to_string()));
        }

        for (tier, rule) in &self.rules {
            if let TierRule::AlwaysAllow { reason } = rule {
                if reason.trim().is_empty() {
                    return Err(ConsentError::ConfigError(format!(
                        "Tier {}: always_allow requires an audit reason",
                        tier
                    )));
                }
            }
        }

        if self.government_entities.iter().any(|e| e.trim().is_empty()) {
            return Err(ConsentError::ConfigError(
                "Government entity ids must not be blank".to_string(),
            ));
        }

        if self.regulated_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConsentError::ConfigError(
                "Regulated keywords must not be blank".to_string(),
            ));
        }

        Ok(())
    }
}
