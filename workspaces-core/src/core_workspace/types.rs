//! Identifier and time types shared by workspaces, memberships and invitations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            /// Create a new random identifier
            pub fn generate() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }
    };
}

string_id! {
    /// Unique identifier for a Workspace (the tenant key)
    WorkspaceId
}

string_id! {
    /// Identifier of a user in the external user directory
    UserId
}

string_id! {
    /// Unique identifier for a Membership row
    MembershipId
}

string_id! {
    /// Unique identifier for an Invitation row
    InvitationId
}

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
fn millis_of(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(millis_of(duration))
    }

    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(millis_of(duration)))
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(millis_of(duration)))
    }

    /// Column representation; SQLite integers are signed.
    pub(crate) fn to_sql(self) -> i64 {
        self.0.min(i64::MAX as u64) as i64
    }

    pub(crate) fn from_sql(value: i64) -> Self {
        Timestamp(value.max(0) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_is_unique() {
        let a = WorkspaceId::generate();
        let b = WorkspaceId::generate();
        assert_ne!(a, b, "Generated IDs should be unique");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = UserId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert_eq!(id.to_string(), "alice");
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let ts = Timestamp::from_millis(10_000);
        assert_eq!(ts.saturating_add(Duration::from_secs(1)).as_millis(), 11_000);
        assert_eq!(ts.saturating_sub(Duration::from_secs(60)).as_millis(), 0);
    }

    #[test]
    fn test_timestamp_saturates_on_huge_durations() {
        let ts = Timestamp::from_millis(5);
        let huge = Duration::from_secs(u64::MAX / 10);
        assert_eq!(ts.saturating_add(huge), Timestamp(u64::MAX));
        assert_eq!(ts.saturating_add(Duration::MAX), Timestamp(u64::MAX));
        assert_eq!(ts.saturating_sub(huge), Timestamp(0));
    }

    #[test]
    fn test_timestamp_sql_clamps() {
        assert_eq!(Timestamp::from_sql(-5), Timestamp(0));
        assert_eq!(Timestamp(u64::MAX).to_sql(), i64::MAX);
    }

    #[test]
    fn test_timestamp_now_is_monotonic_enough() {
        let ts1 = Timestamp::now();
        let ts2 = Timestamp::now();
        assert!(ts2 >= ts1);
    }
}
