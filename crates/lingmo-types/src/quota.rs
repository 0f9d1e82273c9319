//! Quota figures per provider endpoint.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// Where the current usage figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Authoritative figure reported by the vendor (or entered by an operator).
    Reported,
    /// Locally accumulated, possibly from heuristic token counts.
    Estimated,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::Reported => write!(f, "reported"),
            SyncType::Estimated => write!(f, "estimated"),
        }
    }
}

impl FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reported" => Ok(SyncType::Reported),
            "estimated" => Ok(SyncType::Estimated),
            other => Err(format!("invalid sync type: '{other}'")),
        }
    }
}

/// Point-in-time copy of one model's quota counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub model_id: ModelId,
    /// Zero means unlimited.
    pub total_tokens: u64,
    pub used_tokens: u64,
    pub sync_type: SyncType,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl QuotaSnapshot {
    /// Fresh, unlimited quota with nothing used.
    pub fn unlimited(model_id: ModelId) -> Self {
        Self {
            model_id,
            total_tokens: 0,
            used_tokens: 0,
            sync_type: SyncType::Estimated,
            last_sync_time: None,
        }
    }

    /// Tokens left before the quota is used up (saturating).
    pub fn remaining(&self) -> u64 {
        self.total_tokens.saturating_sub(self.used_tokens)
    }

    /// `used / total`, or 0.0 when the quota is unlimited.
    pub fn usage_ratio(&self) -> f64 {
        usage_ratio(self.used_tokens, self.total_tokens)
    }
}

/// `used / total`, treating a zero total as unlimited.
pub fn usage_ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

/// Outcome of re-evaluating the alert edge after a quota update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// No change in which side of the alert threshold the model is on.
    None,
    /// Crossed upward. The caller emits exactly one notification.
    Raised,
    /// Dropped back below. Re-arms the alert silently.
    Cleared,
}

/// Management-facing quota row, with derived figures filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaView {
    pub model_id: ModelId,
    pub total_tokens: u64,
    pub used_tokens: u64,
    pub remaining_tokens: u64,
    pub usage_ratio: f64,
    pub sync_type: SyncType,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub eligible: bool,
}
