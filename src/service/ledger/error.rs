use std::fmt;

use uuid::Uuid;

use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralRejection {
    SelfReferral,
    AlreadyAttributed,
    StaleAccount,
}

impl fmt::Display for ReferralRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferralRejection::SelfReferral => write!(f, "self referral"),
            ReferralRejection::AlreadyAttributed => write!(f, "already attributed"),
            ReferralRejection::StaleAccount => write!(f, "account past the acceptance window"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: u32, available: u32 },
    #[error("Invalid referral: {0}")]
    InvalidReferral(ReferralRejection),
    #[error("Spend amount must be positive")]
    InvalidAmount,
    #[error("Unknown user: {0}")]
    UnknownUser(Uuid),
    /// Conditional-update retries exhausted under sustained contention.
    #[error("Conflicting updates for user {0}")]
    Contention(Uuid),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
