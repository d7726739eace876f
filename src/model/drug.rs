use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserTier;

/// Tri-state access label on a drug record. `PremiumGated` substances are
/// visible to PREMIUM subscribers only; `Forbidden` ones to nobody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DangerClass {
    Safe,
    PremiumGated,
    Forbidden,
}

impl DangerClass {
    pub fn allows(&self, tier: UserTier) -> bool {
        match self {
            DangerClass::Safe => true,
            DangerClass::PremiumGated => tier == UserTier::Premium,
            DangerClass::Forbidden => false,
        }
    }
}

/// Structured pharmacological payload produced by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugContent {
    pub overview: String,
    pub mechanism: String,
    pub dosages: Vec<String>,
    pub interactions: Vec<String>,
    pub analogs: Vec<String>,
    pub research: Vec<String>,
    pub danger: DangerClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugRecord {
    pub id: Uuid,
    /// Canonical display name, as the assistant resolved it.
    pub name: String,
    /// Normalized lookup key; also the cache key for this record.
    pub name_key: String,
    pub content: DrugContent,
    pub updated_at: DateTime<Utc>,
}

impl DrugRecord {
    pub fn new(name: &str, content: DrugContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            name_key: normalize_name(name),
            content,
            updated_at: Utc::now(),
        }
    }

    pub fn danger(&self) -> DangerClass {
        self.content.danger
    }
}

/// Lower-cased, trimmed, inner whitespace collapsed to single spaces.
/// Shared by drug lookups and job idempotency keys so "Ibuprofen " and
/// "ibuprofen" resolve to the same record.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize_name("  Ibuprofen "), "ibuprofen");
        assert_eq!(normalize_name("Acetyl\tSalicylic  Acid"), "acetyl salicylic acid");
        assert_eq!(normalize_name("ibuprofen"), normalize_name("IBUPROFEN"));
    }

    #[test]
    fn danger_gate_by_tier() {
        assert!(DangerClass::Safe.allows(UserTier::Default));
        assert!(!DangerClass::PremiumGated.allows(UserTier::Lite));
        assert!(DangerClass::PremiumGated.allows(UserTier::Premium));
        assert!(!DangerClass::Forbidden.allows(UserTier::Premium));
    }
}
