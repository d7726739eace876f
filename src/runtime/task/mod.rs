use std::fmt::{self, Write as _};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::drug::normalize_name;
use crate::model::user::UserTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    CreateDrug,
    UpdateDrug,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::CreateDrug => write!(f, "create_drug"),
            OperationKind::UpdateDrug => write!(f, "update_drug"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Who asked for the job; the tier drives queue priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub user_id: Uuid,
    pub telegram_user_id: u64,
    pub user_tier: UserTier,
}

/// Deterministic dedupe key over the operation's semantic identity:
/// the kind plus the normalized target name, hashed so the key is safe
/// to embed anywhere.
pub fn idempotency_key(kind: OperationKind, target: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", kind, normalize_name(target)).as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub idempotency_key: String,
    pub kind: OperationKind,
    pub canonical_name: String,
    pub context: JobContext,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(kind: OperationKind, canonical_name: &str, context: JobContext, expiry: Duration) -> Self {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::seconds(600));
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key(kind, canonical_name),
            kind,
            canonical_name: canonical_name.to_string(),
            context,
            status: JobStatus::Queued,
            created_at: now,
            expires_at,
            error: None,
        }
    }

    /// Whether this job still owns its idempotency key. QUEUED and
    /// IN_PROGRESS block a new enqueue; a QUEUED job past `expires_at` has
    /// expired unclaimed; FAILED blocks until `expires_at` so a broken
    /// target is not immediately re-enqueued by every waiting caller; DONE
    /// frees the key at once.
    pub fn blocks_new_enqueue(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => now < self.expires_at,
            JobStatus::InProgress => true,
            JobStatus::Failed => now < self.expires_at,
            JobStatus::Done => false,
        }
    }
}
