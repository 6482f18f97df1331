// src/subscription.rs
// Expiry is lazy: a lapsed paid plan keeps its stored value until an explicit downgrade.

use crate::error::{Error, Result};
use crate::models::{AudioQuality, Plan, Subscription};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Offline download allowance of the premium plan.
pub const PREMIUM_OFFLINE_QUOTA: i64 = 100;

/// Default length of a purchased plan.
pub const DEFAULT_PLAN_DAYS: u32 = 30;

/// Longest plan a single upgrade may grant.
pub const MAX_PLAN_DAYS: u32 = 36_500;

impl Plan {
    /// Offline download cap granted on upgrade (0 = unlimited).
    pub fn offline_quota(self) -> i64 {
        match self {
            Plan::Premium => PREMIUM_OFFLINE_QUOTA,
            Plan::Free | Plan::PremiumPlus => 0,
        }
    }

    pub fn audio_quality(self) -> AudioQuality {
        match self {
            Plan::Free => AudioQuality::Standard,
            Plan::Premium => AudioQuality::High,
            Plan::PremiumPlus => AudioQuality::Ultra,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Premium => "Premium",
            Plan::PremiumPlus => "Premium Plus",
        }
    }

    /// Monthly price in cents, `None` for the free plan.
    pub fn price_cents(self) -> Option<i64> {
        match self {
            Plan::Free => None,
            Plan::Premium => Some(499),
            Plan::PremiumPlus => Some(999),
        }
    }
}

/// Audio quality tier recorded on play and download events.
///
/// Principals without a subscription row (including anonymous ones) get standard.
pub fn get_audio_quality(subscription: Option<&Subscription>) -> AudioQuality {
    subscription
        .map(|s| s.plan.audio_quality())
        .unwrap_or(AudioQuality::Standard)
}

/// Field values written by an upgrade.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpgradeTerms {
    pub plan: Plan,
    pub since: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub offline_download_quota: i64,
}

impl UpgradeTerms {
    pub fn new(plan: Plan, duration_days: u32, now: DateTime<Utc>) -> Result<Self> {
        if plan == Plan::Free {
            return Err(Error::InvalidState(
                "cannot upgrade to the free plan, downgrade instead".to_string(),
            ));
        }
        if duration_days == 0 || duration_days > MAX_PLAN_DAYS {
            return Err(Error::BadRequest(format!(
                "duration_days must be between 1 and {MAX_PLAN_DAYS}"
            )));
        }
        let expires = now
            .checked_add_signed(Duration::days(i64::from(duration_days)))
            .ok_or_else(|| Error::BadRequest("plan expiry is out of range".to_string()))?;
        Ok(Self {
            plan,
            since: now,
            expires,
            offline_download_quota: plan.offline_quota(),
        })
    }
}

impl Subscription {
    pub fn free(user_id: Uuid) -> Self {
        Self {
            user_id,
            plan: Plan::Free,
            since: None,
            expires: None,
            offline_downloads_used: 0,
            offline_download_quota: 0,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.plan == Plan::Free {
            return false;
        }
        match self.expires {
            None => true, // lifetime
            Some(expires) => now < expires,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    /// Whole days left on an active, expiring plan. Zero otherwise.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        match self.expires {
            Some(expires) if self.is_active_at(now) => (expires - now).num_days().max(0),
            _ => 0,
        }
    }

    pub fn upgrade(&mut self, terms: &UpgradeTerms) {
        self.plan = terms.plan;
        self.since = Some(terms.since);
        self.expires = Some(terms.expires);
        self.offline_download_quota = terms.offline_download_quota;
    }

    pub fn downgrade_to_free(&mut self) {
        self.plan = Plan::Free;
        self.expires = None;
        self.offline_download_quota = 0;
        self.offline_downloads_used = 0;
    }

    pub fn can_download_offline_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active_at(now) {
            return false;
        }
        if self.offline_download_quota == 0 {
            return true;
        }
        self.offline_downloads_used < self.offline_download_quota
    }

    /// Consumes one offline download slot if one is available.
    ///
    /// Callers sharing a row must hold it exclusively for the check and the
    /// increment together.
    pub fn try_record_offline_download(&mut self, now: DateTime<Utc>) -> bool {
        if !self.can_download_offline_at(now) {
            return false;
        }
        self.offline_downloads_used += 1;
        true
    }
}
