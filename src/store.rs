// src/store.rs
use crate::error::Result;
use crate::models::{
    Artist, DownloadEvent, NewDownload, NewPlay, Payment, PlayEvent, PlayTarget, Song,
    SongCounters, SongRanking, SongStats, Subscription, TrendingSong, User,
};
use crate::subscription::UpgradeTerms;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence for counters, subscriptions, audit events and edges.
///
/// Every mutating method is atomic on its own. Edge toggles rely on the pair
/// uniqueness of the backing table, not on a read followed by a write.
#[async_trait]
pub trait UsageStore: Send + Sync {
    // =========================================================================
    // Principals
    // =========================================================================

    /// Inserts the user together with its free subscription row.
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>>;

    /// Writes the upgrade terms, creating the row if missing.
    /// `offline_downloads_used` is left untouched on existing rows.
    async fn upgrade_subscription(
        &self,
        user_id: Uuid,
        terms: &UpgradeTerms,
    ) -> Result<Subscription>;

    /// Moves the row to the free plan, creating it if missing.
    async fn downgrade_subscription(&self, user_id: Uuid) -> Result<Subscription>;

    /// Consumes one offline download slot. Returns false, without writing,
    /// when the plan is inactive at `now` or the quota is exhausted.
    async fn record_offline_download(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Consumes one offline slot of `download.user_id` and records the download
    /// in one unit. `None`, without writing, when the slot is refused.
    async fn record_offline_download_event(
        &self,
        download: &NewDownload,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadEvent>>;

    // =========================================================================
    // Artists and songs
    // =========================================================================

    /// Returns the user's artist profile, creating it with `name` if missing.
    /// The flag tells whether it was created by this call.
    async fn ensure_artist(&self, user_id: Uuid, name: &str) -> Result<(Artist, bool)>;

    async fn get_artist(&self, artist_id: Uuid) -> Result<Option<Artist>>;

    async fn get_artist_by_user(&self, user_id: Uuid) -> Result<Option<Artist>>;

    /// Returns false if the artist does not exist.
    async fn set_artist_verified(&self, artist_id: Uuid, verified: bool) -> Result<bool>;

    async fn create_song(&self, song: &Song) -> Result<()>;

    async fn get_song(&self, song_id: Uuid) -> Result<Option<Song>>;

    /// Returns false if the song does not exist.
    async fn set_song_approved(&self, song_id: Uuid, approved: bool) -> Result<bool>;

    /// Administrative reset of both aggregate counters.
    /// Returns false if the song does not exist.
    async fn reset_song_counters(&self, song_id: Uuid) -> Result<bool>;

    /// Counters of the artist's approved songs.
    async fn approved_song_counters(&self, artist_id: Uuid) -> Result<Vec<SongCounters>>;

    /// Approved songs by descending counter, newest upload first on ties.
    async fn top_songs(&self, ranking: SongRanking, limit: i64) -> Result<Vec<Song>>;

    /// Approved songs played at or after `since`, by recent plays then recent downloads.
    async fn trending_songs(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<TrendingSong>>;

    // =========================================================================
    // Usage events
    // =========================================================================

    /// Increments `play_count` and appends the play event in one unit.
    /// Fails with `NotFound` if the song does not exist.
    async fn record_play(&self, play: &NewPlay) -> Result<PlayEvent>;

    /// Increments `download_count` and appends the download event in one unit.
    /// Fails with `NotFound` if the song does not exist.
    async fn record_download(&self, download: &NewDownload) -> Result<DownloadEvent>;

    /// Sets `duration_played` on the targeted event owned by `user_id`.
    /// Returns false when no such event exists.
    async fn update_play_duration(
        &self,
        target: PlayTarget,
        user_id: Uuid,
        duration_played: i32,
    ) -> Result<bool>;

    /// Newest first.
    async fn recent_plays(&self, song_id: Uuid, limit: i64) -> Result<Vec<PlayEvent>>;

    /// `recent_*` figures count events at or after `since`.
    async fn song_stats(&self, song_id: Uuid, since: DateTime<Utc>) -> Result<Option<SongStats>>;

    // =========================================================================
    // Follow and like edges
    // =========================================================================

    /// Returns the new state: true if the edge now exists.
    async fn toggle_follow(&self, follower_id: Uuid, artist_id: Uuid) -> Result<bool>;

    /// Returns the new state: true if the edge now exists.
    async fn toggle_like(&self, user_id: Uuid, song_id: Uuid) -> Result<bool>;

    async fn count_followers(&self, artist_id: Uuid) -> Result<i64>;

    async fn count_likes(&self, song_id: Uuid) -> Result<i64>;

    // =========================================================================
    // Payments
    // =========================================================================

    async fn create_payment(&self, payment: &Payment) -> Result<()>;

    async fn get_payment(&self, transaction_id: &str) -> Result<Option<Payment>>;

    /// Moves a pending payment to completed and applies `terms` to the payer's
    /// subscription in one unit. `None` if the payment was not pending.
    async fn complete_payment_and_upgrade(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
        terms: &UpgradeTerms,
    ) -> Result<Option<Subscription>>;

    /// Moves a pending payment to failed. Returns false if it was not pending.
    async fn fail_payment(&self, transaction_id: &str) -> Result<bool>;
}
