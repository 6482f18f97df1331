// src/access.rs
use crate::models::{Song, Subscription};
use chrono::{DateTime, Utc};

/// Decides whether a principal may stream or download `song`.
///
/// `subscription` is `None` for anonymous principals and for authenticated ones
/// without a subscription row; both fail closed on premium-only songs.
pub fn can_access(song: &Song, subscription: Option<&Subscription>, now: DateTime<Utc>) -> bool {
    if !song.is_premium_only {
        return true;
    }
    subscription.is_some_and(|s| s.is_active_at(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Plan;
    use crate::subscription::UpgradeTerms;
    use chrono::Duration;
    use uuid::Uuid;

    fn song(premium_only: bool) -> Song {
        Song {
            id: Uuid::new_v4(),
            artist_id: Uuid::new_v4(),
            title: "Kampala Nights".to_string(),
            duration: 212,
            play_count: 0,
            download_count: 0,
            is_premium_only: premium_only,
            preview_duration: 30,
            is_approved: true,
            uploaded_at: Utc::now(),
        }
    }

    fn subscribed(plan: Plan, start: DateTime<Utc>) -> Subscription {
        let mut sub = Subscription::free(Uuid::new_v4());
        sub.upgrade(&UpgradeTerms::new(plan, 30, start).unwrap());
        sub
    }

    #[test]
    fn open_song_is_open_to_everyone() {
        let now = Utc::now();
        let free = Subscription::free(Uuid::new_v4());
        assert!(can_access(&song(false), None, now));
        assert!(can_access(&song(false), Some(&free), now));
    }

    #[test]
    fn premium_song_requires_active_plan() {
        let now = Utc::now();
        let s = song(true);
        assert!(!can_access(&s, None, now));
        assert!(!can_access(&s, Some(&Subscription::free(Uuid::new_v4())), now));
        assert!(can_access(&s, Some(&subscribed(Plan::Premium, now)), now));
        assert!(can_access(&s, Some(&subscribed(Plan::PremiumPlus, now)), now));
    }

    #[test]
    fn lapsed_plan_is_denied() {
        let now = Utc::now();
        let lapsed = subscribed(Plan::Premium, now - Duration::days(31));
        assert!(!can_access(&song(true), Some(&lapsed), now));
    }
}
