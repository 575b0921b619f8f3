//! Presence snapshots and the human-readable activity label.

use serde::{Deserialize, Serialize};

use crate::models::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Away,
    Offline,
}

/// Derived, non-persisted view of a user's presence. Computed server-side
/// and re-fetched on a fixed cadence; there is no push channel for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub state: PresenceState,
    pub last_seen_minutes: i64,
}

impl PresenceSnapshot {
    pub fn is_online(&self) -> bool {
        self.state == PresenceState::Online
    }

    /// Human status line. Bucket boundaries sit at 1/60/1440 minutes.
    pub fn last_active_label(&self) -> String {
        if self.is_online() {
            return "Active now".to_string();
        }
        let minutes = self.last_seen_minutes.max(0);
        if minutes == 0 {
            "Active moments ago".to_string()
        } else if minutes < 60 {
            format!("Active {} minute{} ago", minutes, plural(minutes))
        } else if minutes < 1440 {
            let hours = minutes / 60;
            format!("Active {} hour{} ago", hours, plural(hours))
        } else {
            let days = minutes / 1440;
            format!("Active {} day{} ago", days, plural(days))
        }
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(state: PresenceState, minutes: i64) -> PresenceSnapshot {
        PresenceSnapshot {
            user_id: Uuid::new_v4(),
            state,
            last_seen_minutes: minutes,
        }
    }

    #[test]
    fn online_wins_over_minutes() {
        assert_eq!(
            snapshot(PresenceState::Online, 500).last_active_label(),
            "Active now"
        );
        assert!(snapshot(PresenceState::Online, 0).is_online());
        assert!(!snapshot(PresenceState::Away, 0).is_online());
    }

    #[test]
    fn label_buckets() {
        assert_eq!(
            snapshot(PresenceState::Offline, 0).last_active_label(),
            "Active moments ago"
        );
        assert_eq!(
            snapshot(PresenceState::Offline, 45).last_active_label(),
            "Active 45 minutes ago"
        );
        assert_eq!(
            snapshot(PresenceState::Offline, 90).last_active_label(),
            "Active 1 hour ago"
        );
        assert_eq!(
            snapshot(PresenceState::Offline, 2000).last_active_label(),
            "Active 1 day ago"
        );
    }

    #[test]
    fn label_bucket_boundaries() {
        assert_eq!(
            snapshot(PresenceState::Away, 1).last_active_label(),
            "Active 1 minute ago"
        );
        assert_eq!(
            snapshot(PresenceState::Away, 59).last_active_label(),
            "Active 59 minutes ago"
        );
        assert_eq!(
            snapshot(PresenceState::Away, 60).last_active_label(),
            "Active 1 hour ago"
        );
        assert_eq!(
            snapshot(PresenceState::Away, 1439).last_active_label(),
            "Active 23 hours ago"
        );
        assert_eq!(
            snapshot(PresenceState::Away, 1440).last_active_label(),
            "Active 1 day ago"
        );
    }
}
