//! Lease Record
//!
//! The single shared entity of an election group, its JSON body encoding,
//! and the rules for building the next record on acquire, renew and release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shared lease record as persisted by a lease store.
///
/// The fencing token is owned by the store and is never part of the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Current (or last) leader; empty means unowned
    pub holder_identity: String,
    /// Lease duration written by the holder. Informational only.
    pub lease_duration_seconds: u64,
    /// When the current holder acquired the lease
    pub acquire_time: DateTime<Utc>,
    /// When the current holder last renewed the lease
    pub renew_time: DateTime<Utc>,
    /// Number of times the holder changed to a new identity
    pub transitions: u64,
}

impl LeaseRecord {
    /// Whether no participant currently claims the lease
    pub fn is_unowned(&self) -> bool {
        self.holder_identity.is_empty()
    }

    /// Whether the record names `identity` as holder
    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.is_unowned() && self.holder_identity == identity
    }

    /// Build the record `identity` writes to take (or keep) the lease.
    ///
    /// `previous` is the last observed record, `None` when the store has none.
    /// A change of holder bumps `transitions` and resets `acquire_time`;
    /// re-acquiring a record that already names `identity` keeps both.
    pub fn acquired_by(
        previous: Option<&LeaseRecord>,
        identity: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> LeaseRecord {
        match previous {
            Some(prev) if prev.is_held_by(identity) => LeaseRecord {
                holder_identity: identity.to_string(),
                lease_duration_seconds: whole_seconds(lease_duration),
                acquire_time: prev.acquire_time,
                renew_time: now,
                transitions: prev.transitions,
            },
            _ => LeaseRecord {
                holder_identity: identity.to_string(),
                lease_duration_seconds: whole_seconds(lease_duration),
                acquire_time: now,
                renew_time: now,
                transitions: previous.map_or(0, |prev| prev.transitions) + 1,
            },
        }
    }

    /// Same holder, fresh `renew_time`
    pub fn renewed(&self, lease_duration: Duration, now: DateTime<Utc>) -> LeaseRecord {
        LeaseRecord {
            lease_duration_seconds: whole_seconds(lease_duration),
            renew_time: now,
            ..self.clone()
        }
    }

    /// Cleared holder so the next election does not wait out the lease.
    /// `transitions` is left as is; the next acquirer bumps it.
    pub fn released(&self, now: DateTime<Utc>) -> LeaseRecord {
        LeaseRecord {
            holder_identity: String::new(),
            lease_duration_seconds: self.lease_duration_seconds,
            acquire_time: now,
            renew_time: now,
            transitions: self.transitions,
        }
    }

    /// Encode the record body as JSON
    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON record body
    pub fn decode(body: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Lease durations are persisted in whole seconds, rounded up
fn whole_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Opaque optimistic-concurrency token handed out by a lease store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FencingToken(String);

impl FencingToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FencingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FencingToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// A record together with the token it was read (or written) at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub record: LeaseRecord,
    pub token: FencingToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_first_acquisition_counts_as_transition() {
        let record = LeaseRecord::acquired_by(None, "node-a", Duration::from_secs(15), at(0));
        assert_eq!(record.holder_identity, "node-a");
        assert_eq!(record.transitions, 1);
        assert_eq!(record.lease_duration_seconds, 15);
        assert_eq!(record.acquire_time, at(0));
        assert_eq!(record.renew_time, at(0));
    }

    #[test]
    fn test_takeover_bumps_transitions() {
        let a = LeaseRecord::acquired_by(None, "node-a", Duration::from_secs(15), at(0));
        let b = LeaseRecord::acquired_by(Some(&a), "node-b", Duration::from_secs(15), at(21));
        assert_eq!(b.holder_identity, "node-b");
        assert_eq!(b.transitions, 2);
        assert_eq!(b.acquire_time, at(21));
    }

    #[test]
    fn test_reacquire_own_record_keeps_transitions() {
        let a = LeaseRecord::acquired_by(None, "node-a", Duration::from_secs(15), at(0));
        let again = LeaseRecord::acquired_by(Some(&a), "node-a", Duration::from_secs(15), at(30));
        assert_eq!(again.transitions, 1);
        assert_eq!(again.acquire_time, at(0));
        assert_eq!(again.renew_time, at(30));
    }

    #[test]
    fn test_renew_and_release() {
        let a = LeaseRecord::acquired_by(None, "node-a", Duration::from_secs(15), at(0));
        let renewed = a.renewed(Duration::from_secs(15), at(5));
        assert_eq!(renewed.renew_time, at(5));
        assert_eq!(renewed.transitions, a.transitions);
        assert_eq!(renewed.acquire_time, a.acquire_time);

        let released = renewed.released(at(7));
        assert!(released.is_unowned());
        assert_eq!(released.transitions, 1);

        // Taking a released lease is a new holder
        let b = LeaseRecord::acquired_by(Some(&released), "node-b", Duration::from_secs(15), at(8));
        assert_eq!(b.transitions, 2);
    }

    #[test]
    fn test_body_uses_camel_case_and_omits_token() {
        let record = LeaseRecord::acquired_by(None, "node-a", Duration::from_millis(1500), at(0));
        let body = record.encode().unwrap();
        assert!(body.contains("\"holderIdentity\":\"node-a\""));
        assert!(body.contains("\"leaseDurationSeconds\":2"));
        assert!(body.contains("\"renewTime\""));
        assert!(!body.contains("token"));

        let decoded = LeaseRecord::decode(&body).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(LeaseRecord::decode("{\"holderIdentity\": 3}").is_err());
    }
}
