// src/types/broadcast.rs
//! Urgent, time-boxed mass-hiring requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    Active,
    Filled,
    /// Withdrawn by the employer before filling.
    Cancelled,
}

impl fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub broadcast_id: String,
    pub employer_id: String,
    pub role: String,
    pub wage: String,
    pub target_count: u32,
    #[serde(default)]
    pub hired_count: u32,
    pub status: BroadcastStatus,
    pub location: Location,
    pub created_at: DateTime<Utc>,
    /// Dispatch reach in kilometres; `None` is unbounded.
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub version: u64,
}

impl Broadcast {
    pub fn is_open(&self) -> bool {
        self.status == BroadcastStatus::Active && self.hired_count < self.target_count
    }

    /// Offers still needed before the broadcast fills.
    pub fn remaining(&self) -> u32 {
        self.target_count.saturating_sub(self.hired_count)
    }

    /// Counts one placed offer. Returns `true` when this fills the broadcast.
    pub fn record_placement(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.hired_count += 1;
        if self.hired_count == self.target_count {
            self.status = BroadcastStatus::Filled;
            return true;
        }
        false
    }

    /// Gives back one counted placement. A filled broadcast reopens; a
    /// cancelled one stays cancelled.
    pub fn release_placement(&mut self) {
        self.hired_count = self.hired_count.saturating_sub(1);
        if self.status == BroadcastStatus::Filled {
            self.status = BroadcastStatus::Active;
        }
    }

    /// Patch describing the current progress counters.
    pub fn progress_patch(&self) -> serde_json::Value {
        serde_json::json!({
            "hiredCount": self.hired_count,
            "status": self.status,
        })
    }

    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBroadcast {
    pub employer_id: String,
    pub role: String,
    pub wage: String,
    pub target_count: u32,
    pub location: Location,
    #[serde(default)]
    pub radius_km: Option<f64>,
}

impl NewBroadcast {
    pub fn to_document(&self, created_at: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "employerId": self.employer_id,
            "role": self.role,
            "wage": self.wage,
            "targetCount": self.target_count,
            "hiredCount": 0,
            "status": BroadcastStatus::Active,
            "location": self.location,
            "createdAt": created_at,
            "radiusKm": self.radius_km,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(target: u32) -> Broadcast {
        Broadcast {
            broadcast_id: "b1".to_string(),
            employer_id: "e1".to_string(),
            role: "Security Guard".to_string(),
            wage: "500".to_string(),
            target_count: target,
            hired_count: 0,
            status: BroadcastStatus::Active,
            location: Location::new(12.97, 77.59),
            created_at: Utc::now(),
            radius_km: None,
            version: 1,
        }
    }

    #[test]
    fn test_record_placement_fills_at_target() {
        let mut b = broadcast(2);
        assert!(!b.record_placement());
        assert_eq!(b.remaining(), 1);
        assert!(b.record_placement());
        assert_eq!(b.status, BroadcastStatus::Filled);
        assert_eq!(b.hired_count, 2);

        assert!(!b.record_placement());
        assert_eq!(b.hired_count, 2);
    }

    #[test]
    fn test_release_reopens_filled_but_not_cancelled() {
        let mut b = broadcast(1);
        assert!(b.record_placement());
        b.release_placement();
        assert!(b.is_open());
        assert_eq!(b.hired_count, 0);

        b.record_placement();
        b.status = BroadcastStatus::Cancelled;
        b.release_placement();
        assert_eq!(b.status, BroadcastStatus::Cancelled);
        assert_eq!(b.hired_count, 0);

        b.release_placement();
        assert_eq!(b.hired_count, 0);
    }

    #[test]
    fn test_cancelled_is_closed() {
        let mut b = broadcast(3);
        b.status = BroadcastStatus::Cancelled;
        assert!(!b.is_open());
        assert!(!b.record_placement());
    }
}
