// src/engine.rs
use crate::access;
use crate::earnings::{self, Earnings};
use crate::error::{Error, Result};
use crate::models::{
    Artist, DownloadEvent, NewDownload, NewPlay, NewSong, Plan, PlayEvent, PlayTarget, Song,
    SongRanking, SongStats, Subscription, TrendingSong, User,
};
use crate::store::UsageStore;
use crate::subscription::{UpgradeTerms, get_audio_quality};
use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Window used for the "recent" figures of song statistics.
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Upper bound for ranking list sizes.
pub const MAX_RANKING_LIMIT: i64 = 100;

const EARNINGS_CACHE_CAPACITY: u64 = 10_000;

/// Play/download accounting and premium access on top of a [`UsageStore`].
///
/// The primitives report business outcomes as plain values. The gated flows
/// (`play`, `download`, `download_for_offline`) turn refusals into [`Error`]
/// variants for the HTTP layer.
#[derive(Clone)]
pub struct UsageEngine {
    store: Arc<dyn UsageStore>,
    // Display cache only. Counters in the store stay authoritative.
    earnings_cache: Option<Cache<Uuid, Earnings>>,
}

impl UsageEngine {
    /// `earnings_ttl` of zero disables the earnings display cache.
    pub fn new(store: Arc<dyn UsageStore>, earnings_ttl: Duration) -> Self {
        let earnings_cache = (!earnings_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(EARNINGS_CACHE_CAPACITY)
                .time_to_live(earnings_ttl)
                .build()
        });
        Self {
            store,
            earnings_cache,
        }
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn register_user(&self, username: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        self.store.create_user(&user).await?;
        tracing::info!(user_id = %user.id, "Registered user {}", user.username);
        Ok(user)
    }

    async fn require_user(&self, user_id: Uuid) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    async fn require_artist(&self, artist_id: Uuid) -> Result<Artist> {
        self.store
            .get_artist(artist_id)
            .await?
            .ok_or_else(|| Error::not_found("artist", artist_id))
    }

    /// Approved songs only; unapproved uploads are not publicly visible.
    async fn visible_song(&self, song_id: Uuid) -> Result<Song> {
        match self.store.get_song(song_id).await? {
            Some(song) if song.is_approved => Ok(song),
            _ => Err(Error::not_found("song", song_id)),
        }
    }

    /// `None` for anonymous principals and for users without a subscription row.
    async fn subscription_of(&self, principal: Option<Uuid>) -> Result<Option<Subscription>> {
        let Some(user_id) = principal else {
            return Ok(None);
        };
        match self.store.get_subscription(user_id).await? {
            Some(sub) => Ok(Some(sub)),
            None => {
                self.require_user(user_id).await?;
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Access policy
    // =========================================================================

    pub async fn can_access(&self, song_id: Uuid, principal: Option<Uuid>) -> Result<bool> {
        let song = self.visible_song(song_id).await?;
        let sub = self.subscription_of(principal).await?;
        Ok(access::can_access(&song, sub.as_ref(), Utc::now()))
    }

    fn check_access(&self, song: &Song, sub: Option<&Subscription>) -> Result<()> {
        if access::can_access(song, sub, Utc::now()) {
            return Ok(());
        }
        tracing::info!(song_id = %song.id, "Premium content requested without active subscription");
        Err(Error::AccessDenied {
            preview_duration: song.preview_duration,
        })
    }

    // =========================================================================
    // Usage counters
    // =========================================================================

    /// Counts a play and appends its audit event. Does not check access.
    pub async fn record_play(
        &self,
        song_id: Uuid,
        principal: Option<Uuid>,
        ip_address: Option<String>,
        user_agent: &str,
        duration_played: i32,
    ) -> Result<PlayEvent> {
        let song = self.visible_song(song_id).await?;
        let sub = self.subscription_of(principal).await?;
        self.insert_play(&song, principal, sub.as_ref(), ip_address, user_agent, duration_played)
            .await
    }

    async fn insert_play(
        &self,
        song: &Song,
        principal: Option<Uuid>,
        sub: Option<&Subscription>,
        ip_address: Option<String>,
        user_agent: &str,
        duration_played: i32,
    ) -> Result<PlayEvent> {
        if duration_played < 0 {
            return Err(Error::BadRequest("duration_played must not be negative".into()));
        }
        let play = NewPlay {
            song_id: song.id,
            user_id: principal,
            ip_address,
            user_agent: user_agent.to_string(),
            duration_played,
            audio_quality: get_audio_quality(sub),
        };
        let event = self.store.record_play(&play).await?;
        tracing::debug!(song_id = %song.id, play_id = %event.id, "Recorded play");
        Ok(event)
    }

    /// Late duration telemetry. Returns false when no matching event exists.
    pub async fn update_play_duration(
        &self,
        play_id: Option<Uuid>,
        song_id: Uuid,
        principal: Uuid,
        duration_played: i32,
    ) -> Result<bool> {
        if duration_played < 0 {
            return Err(Error::BadRequest("duration_played must not be negative".into()));
        }
        let target = match play_id {
            Some(id) => PlayTarget::Event(id),
            None => PlayTarget::Latest { song_id },
        };
        let updated = self
            .store
            .update_play_duration(target, principal, duration_played)
            .await?;
        if !updated {
            tracing::debug!(%song_id, user_id = %principal, "No play event to update");
        }
        Ok(updated)
    }

    /// Counts a download and appends its audit event. Does not check access.
    pub async fn record_download(
        &self,
        song_id: Uuid,
        principal: Option<Uuid>,
        ip_address: Option<String>,
        file_size: i64,
    ) -> Result<DownloadEvent> {
        let song = self.visible_song(song_id).await?;
        let sub = self.subscription_of(principal).await?;
        self.insert_download(&song, principal, sub.as_ref(), ip_address, file_size)
            .await
    }

    fn new_download(
        song: &Song,
        principal: Option<Uuid>,
        sub: Option<&Subscription>,
        ip_address: Option<String>,
        file_size: i64,
        is_offline_download: bool,
    ) -> Result<NewDownload> {
        if file_size < 0 {
            return Err(Error::BadRequest("file_size must not be negative".into()));
        }
        Ok(NewDownload {
            song_id: song.id,
            user_id: principal,
            ip_address,
            file_size,
            is_offline_download,
            audio_quality: get_audio_quality(sub),
        })
    }

    async fn insert_download(
        &self,
        song: &Song,
        principal: Option<Uuid>,
        sub: Option<&Subscription>,
        ip_address: Option<String>,
        file_size: i64,
    ) -> Result<DownloadEvent> {
        let download = Self::new_download(song, principal, sub, ip_address, file_size, false)?;
        let event = self.store.record_download(&download).await?;
        tracing::debug!(song_id = %song.id, download_id = %event.id, "Recorded download");
        Ok(event)
    }

    /// Access check followed by [`Self::record_play`].
    pub async fn play(
        &self,
        song_id: Uuid,
        principal: Option<Uuid>,
        ip_address: Option<String>,
        user_agent: &str,
    ) -> Result<(Song, PlayEvent)> {
        let song = self.visible_song(song_id).await?;
        let sub = self.subscription_of(principal).await?;
        self.check_access(&song, sub.as_ref())?;
        let event = self
            .insert_play(&song, principal, sub.as_ref(), ip_address, user_agent, 0)
            .await?;
        Ok((song, event))
    }

    /// Access check followed by [`Self::record_download`].
    pub async fn download(
        &self,
        song_id: Uuid,
        principal: Option<Uuid>,
        ip_address: Option<String>,
        file_size: i64,
    ) -> Result<DownloadEvent> {
        let song = self.visible_song(song_id).await?;
        let sub = self.subscription_of(principal).await?;
        self.check_access(&song, sub.as_ref())?;
        self.insert_download(&song, principal, sub.as_ref(), ip_address, file_size)
            .await
    }

    /// Access check, then offline quota consumption together with the download record.
    pub async fn download_for_offline(
        &self,
        song_id: Uuid,
        principal: Uuid,
        ip_address: Option<String>,
        file_size: i64,
    ) -> Result<DownloadEvent> {
        let song = self.visible_song(song_id).await?;
        let sub = self.subscription_of(Some(principal)).await?;
        self.check_access(&song, sub.as_ref())?;
        let download =
            Self::new_download(&song, Some(principal), sub.as_ref(), ip_address, file_size, true)?;
        let Some(event) = self
            .store
            .record_offline_download_event(&download, Utc::now())
            .await?
        else {
            tracing::info!(user_id = %principal, %song_id, "Offline download refused");
            return Err(Error::QuotaExceeded);
        };
        tracing::debug!(%song_id, download_id = %event.id, "Recorded offline download");
        Ok(event)
    }

    pub async fn song_stats(&self, song_id: Uuid) -> Result<SongStats> {
        self.visible_song(song_id).await?;
        let since = Utc::now() - chrono::Duration::days(RECENT_WINDOW_DAYS);
        self.store
            .song_stats(song_id, since)
            .await?
            .ok_or_else(|| Error::not_found("song", song_id))
    }

    pub async fn recent_plays(&self, song_id: Uuid, limit: i64) -> Result<Vec<PlayEvent>> {
        self.visible_song(song_id).await?;
        self.store.recent_plays(song_id, limit).await
    }

    pub async fn top_songs(&self, ranking: SongRanking, limit: i64) -> Result<Vec<Song>> {
        self.store
            .top_songs(ranking, limit.clamp(1, MAX_RANKING_LIMIT))
            .await
    }

    /// Songs with plays in the last `days` days, hottest first.
    pub async fn trending_songs(&self, days: u32, limit: i64) -> Result<Vec<TrendingSong>> {
        if !(1..=365).contains(&days) {
            return Err(Error::BadRequest("days must be between 1 and 365".into()));
        }
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        self.store
            .trending_songs(since, limit.clamp(1, MAX_RANKING_LIMIT))
            .await
    }

    // =========================================================================
    // Subscriptions and offline quota
    // =========================================================================

    /// Stored subscription of a principal, free if the row is missing.
    pub async fn subscription(&self, principal: Uuid) -> Result<Subscription> {
        Ok(self
            .subscription_of(Some(principal))
            .await?
            .unwrap_or_else(|| Subscription::free(principal)))
    }

    pub async fn upgrade(
        &self,
        principal: Uuid,
        plan: Plan,
        duration_days: u32,
    ) -> Result<Subscription> {
        let terms = UpgradeTerms::new(plan, duration_days, Utc::now())?;
        self.require_user(principal).await?;
        let sub = self.store.upgrade_subscription(principal, &terms).await?;
        tracing::info!(
            user_id = %principal,
            plan = plan.display_name(),
            expires = %terms.expires,
            "Upgraded subscription"
        );
        Ok(sub)
    }

    pub async fn downgrade_to_free(&self, principal: Uuid) -> Result<Subscription> {
        self.require_user(principal).await?;
        let sub = self.store.downgrade_subscription(principal).await?;
        tracing::info!(user_id = %principal, "Downgraded subscription to free");
        Ok(sub)
    }

    pub async fn can_download_offline(&self, principal: Uuid) -> Result<bool> {
        let sub = self.subscription_of(Some(principal)).await?;
        Ok(sub.is_some_and(|s| s.can_download_offline_at(Utc::now())))
    }

    /// Consumes one offline slot. Returns false, without writing, when refused.
    pub async fn record_offline_download(&self, principal: Uuid) -> Result<bool> {
        let recorded = self
            .store
            .record_offline_download(principal, Utc::now())
            .await?;
        if !recorded {
            tracing::info!(user_id = %principal, "Offline download refused");
        }
        Ok(recorded)
    }

    // =========================================================================
    // Artists, songs and earnings
    // =========================================================================

    pub async fn ensure_artist_profile(&self, principal: Uuid, name: &str) -> Result<Artist> {
        self.require_user(principal).await?;
        let (artist, created) = self.store.ensure_artist(principal, name).await?;
        if created {
            tracing::info!(user_id = %principal, artist_id = %artist.id, "Created artist profile");
        }
        Ok(artist)
    }

    /// Stores a new unapproved song, creating the uploader's artist profile first.
    pub async fn publish_song(
        &self,
        principal: Uuid,
        artist_name: &str,
        new_song: NewSong,
    ) -> Result<Song> {
        if new_song.title.trim().is_empty() {
            return Err(Error::BadRequest("title must not be empty".into()));
        }
        if new_song.duration < 0 || new_song.preview_duration < 0 {
            return Err(Error::BadRequest("durations must not be negative".into()));
        }
        let artist = self.ensure_artist_profile(principal, artist_name).await?;
        let song = Song {
            id: Uuid::new_v4(),
            artist_id: artist.id,
            title: new_song.title,
            duration: new_song.duration,
            play_count: 0,
            download_count: 0,
            is_premium_only: new_song.is_premium_only,
            preview_duration: new_song.preview_duration,
            is_approved: false,
            uploaded_at: Utc::now(),
        };
        self.store.create_song(&song).await?;
        tracing::info!(song_id = %song.id, artist_id = %artist.id, "Published song {}", song.title);
        Ok(song)
    }

    pub async fn set_artist_verified(&self, artist_id: Uuid, verified: bool) -> Result<()> {
        if !self.store.set_artist_verified(artist_id, verified).await? {
            return Err(Error::not_found("artist", artist_id));
        }
        tracing::info!(%artist_id, verified, "Artist verification updated");
        Ok(())
    }

    pub async fn set_song_approved(&self, song_id: Uuid, approved: bool) -> Result<()> {
        if !self.store.set_song_approved(song_id, approved).await? {
            return Err(Error::not_found("song", song_id));
        }
        tracing::info!(%song_id, approved, "Song moderation updated");
        Ok(())
    }

    pub async fn reset_counters(&self, song_id: Uuid) -> Result<()> {
        if !self.store.reset_song_counters(song_id).await? {
            return Err(Error::not_found("song", song_id));
        }
        tracing::warn!(%song_id, "Song counters reset");
        Ok(())
    }

    pub async fn artist(&self, artist_id: Uuid) -> Result<Artist> {
        self.require_artist(artist_id).await
    }

    /// Earnings of the artist's approved songs from the current counters.
    pub async fn compute_earnings(&self, artist_id: Uuid) -> Result<Earnings> {
        if let Some(cache) = &self.earnings_cache {
            if let Some(cached) = cache.get(&artist_id).await {
                return Ok(cached);
            }
        }
        self.require_artist(artist_id).await?;
        let counters = self.store.approved_song_counters(artist_id).await?;
        let earnings = earnings::compute_earnings(&counters);
        if let Some(cache) = &self.earnings_cache {
            cache.insert(artist_id, earnings.clone()).await;
        }
        Ok(earnings)
    }

    // =========================================================================
    // Follow and like edges
    // =========================================================================

    pub async fn toggle_follow(&self, principal: Uuid, artist_id: Uuid) -> Result<bool> {
        self.require_user(principal).await?;
        let artist = match self.store.get_artist(artist_id).await? {
            Some(artist) if artist.is_verified => artist,
            _ => return Err(Error::not_found("artist", artist_id)),
        };
        if artist.user_id == principal {
            return Err(Error::InvalidState("you cannot follow yourself".into()));
        }
        self.store.toggle_follow(principal, artist_id).await
    }

    pub async fn toggle_like(&self, principal: Uuid, song_id: Uuid) -> Result<bool> {
        self.require_user(principal).await?;
        self.visible_song(song_id).await?;
        self.store.toggle_like(principal, song_id).await
    }

    pub async fn follower_count(&self, artist_id: Uuid) -> Result<i64> {
        self.store.count_followers(artist_id).await
    }

    pub async fn like_count(&self, song_id: Uuid) -> Result<i64> {
        self.store.count_likes(song_id).await
    }
}
