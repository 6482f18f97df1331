// src/db.rs
use crate::error::{Error, Result};
use crate::models::{
    Artist, DownloadEvent, NewDownload, NewPlay, Payment, PlayEvent, PlayTarget, Song,
    SongCounters, SongRanking, SongStats, Subscription, TrendingSong, User,
};
use crate::store::UsageStore;
use crate::subscription::UpgradeTerms;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str =
    "user_id, plan, since, expires, offline_downloads_used, offline_download_quota";

const PLAY_COLUMNS: &str =
    "id, song_id, user_id, played_at, ip_address, user_agent, duration_played, audio_quality";

const SONG_COLUMNS: &str = "id, artist_id, title, duration, play_count, download_count, \
     is_premium_only, preview_duration, is_approved, uploaded_at";

const PAYMENT_COLUMNS: &str = "id, user_id, plan, amount_cents, network, phone_number, \
     transaction_id, provider_reference, status, created_at, completed_at";

// Row lock taken by the UPDATE serializes concurrent callers; the loser
// re-evaluates the WHERE clause against the committed count.
const CONSUME_OFFLINE_SLOT: &str = "UPDATE subscriptions \
     SET offline_downloads_used = offline_downloads_used + 1 \
     WHERE user_id = $1 \
       AND plan <> 'free' \
       AND (expires IS NULL OR expires > $2) \
       AND (offline_download_quota = 0 OR offline_downloads_used < offline_download_quota)";

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Counters only move through `SET x = x + 1` statements and the offline quota
/// through a conditional update, so concurrent requests never race on a
/// read-modify-write cycle.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn upsert_upgrade(
    conn: &mut PgConnection,
    user_id: Uuid,
    terms: &UpgradeTerms,
) -> Result<Subscription> {
    let sub = sqlx::query_as::<_, Subscription>(&format!(
        "INSERT INTO subscriptions (user_id, plan, since, expires, offline_download_quota) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (user_id) DO UPDATE SET \
            plan = EXCLUDED.plan, \
            since = EXCLUDED.since, \
            expires = EXCLUDED.expires, \
            offline_download_quota = EXCLUDED.offline_download_quota \
         RETURNING {SUBSCRIPTION_COLUMNS}"
    ))
    .bind(user_id)
    .bind(terms.plan)
    .bind(terms.since)
    .bind(terms.expires)
    .bind(terms.offline_download_quota)
    .fetch_one(conn)
    .await?;
    Ok(sub)
}

async fn insert_download(conn: &mut PgConnection, download: &NewDownload) -> Result<DownloadEvent> {
    let updated = sqlx::query("UPDATE songs SET download_count = download_count + 1 WHERE id = $1")
        .bind(download.song_id)
        .execute(&mut *conn)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(Error::not_found("song", download.song_id));
    }

    let event = sqlx::query_as::<_, DownloadEvent>(
        "INSERT INTO download_events \
            (id, song_id, user_id, downloaded_at, ip_address, file_size, is_offline_download, audio_quality) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id, song_id, user_id, downloaded_at, ip_address, file_size, is_offline_download, audio_quality",
    )
    .bind(Uuid::new_v4())
    .bind(download.song_id)
    .bind(download.user_id)
    .bind(Utc::now())
    .bind(&download.ip_address)
    .bind(download.file_size)
    .bind(download.is_offline_download)
    .bind(download.audio_quality)
    .fetch_one(&mut *conn)
    .await?;
    Ok(event)
}

#[async_trait]
impl UsageStore for PgStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO users (id, username, created_at) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.username)
            .bind(user.created_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO subscriptions (user_id, plan) VALUES ($1, 'free')")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn upgrade_subscription(
        &self,
        user_id: Uuid,
        terms: &UpgradeTerms,
    ) -> Result<Subscription> {
        let mut conn = self.pool.acquire().await?;
        upsert_upgrade(&mut *conn, user_id, terms).await
    }

    async fn downgrade_subscription(&self, user_id: Uuid) -> Result<Subscription> {
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO subscriptions (user_id, plan) VALUES ($1, 'free') \
             ON CONFLICT (user_id) DO UPDATE SET \
                plan = 'free', \
                expires = NULL, \
                offline_download_quota = 0, \
                offline_downloads_used = 0 \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn record_offline_download(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(CONSUME_OFFLINE_SLOT)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_offline_download_event(
        &self,
        download: &NewDownload,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadEvent>> {
        let Some(user_id) = download.user_id else {
            return Ok(None);
        };
        let mut tx = self.pool.begin().await?;
        let granted = sqlx::query(CONSUME_OFFLINE_SLOT)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        if granted.rows_affected() == 0 {
            return Ok(None);
        }
        let event = insert_download(&mut *tx, download).await?;
        tx.commit().await?;
        Ok(Some(event))
    }

    async fn ensure_artist(&self, user_id: Uuid, name: &str) -> Result<(Artist, bool)> {
        let inserted = sqlx::query_as::<_, Artist>(
            "INSERT INTO artists (id, user_id, name, is_verified, created_at) \
             VALUES ($1, $2, $3, FALSE, $4) \
             ON CONFLICT (user_id) DO NOTHING \
             RETURNING id, user_id, name, is_verified, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(artist) = inserted {
            return Ok((artist, true));
        }
        let existing = self
            .get_artist_by_user(user_id)
            .await?
            .ok_or_else(|| Error::not_found("artist for user", user_id))?;
        Ok((existing, false))
    }

    async fn get_artist(&self, artist_id: Uuid) -> Result<Option<Artist>> {
        let artist = sqlx::query_as::<_, Artist>(
            "SELECT id, user_id, name, is_verified, created_at FROM artists WHERE id = $1",
        )
        .bind(artist_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(artist)
    }

    async fn get_artist_by_user(&self, user_id: Uuid) -> Result<Option<Artist>> {
        let artist = sqlx::query_as::<_, Artist>(
            "SELECT id, user_id, name, is_verified, created_at FROM artists WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(artist)
    }

    async fn set_artist_verified(&self, artist_id: Uuid, verified: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE artists SET is_verified = $2 WHERE id = $1")
            .bind(artist_id)
            .bind(verified)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_song(&self, song: &Song) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO songs ({SONG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(song.id)
        .bind(song.artist_id)
        .bind(&song.title)
        .bind(song.duration)
        .bind(song.play_count)
        .bind(song.download_count)
        .bind(song.is_premium_only)
        .bind(song.preview_duration)
        .bind(song.is_approved)
        .bind(song.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_song(&self, song_id: Uuid) -> Result<Option<Song>> {
        let song = sqlx::query_as::<_, Song>(&format!(
            "SELECT {SONG_COLUMNS} FROM songs WHERE id = $1"
        ))
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(song)
    }

    async fn set_song_approved(&self, song_id: Uuid, approved: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE songs SET is_approved = $2 WHERE id = $1")
            .bind(song_id)
            .bind(approved)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_song_counters(&self, song_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("UPDATE songs SET play_count = 0, download_count = 0 WHERE id = $1")
                .bind(song_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn approved_song_counters(&self, artist_id: Uuid) -> Result<Vec<SongCounters>> {
        let counters = sqlx::query_as::<_, SongCounters>(
            "SELECT id AS song_id, play_count, download_count FROM songs \
             WHERE artist_id = $1 AND is_approved = TRUE",
        )
        .bind(artist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(counters)
    }

    async fn top_songs(&self, ranking: SongRanking, limit: i64) -> Result<Vec<Song>> {
        let order = match ranking {
            SongRanking::MostPlayed => "play_count",
            SongRanking::MostDownloaded => "download_count",
        };
        let songs = sqlx::query_as::<_, Song>(&format!(
            "SELECT {SONG_COLUMNS} FROM songs WHERE is_approved = TRUE \
             ORDER BY {order} DESC, uploaded_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(songs)
    }

    async fn trending_songs(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<TrendingSong>> {
        let songs = sqlx::query_as::<_, TrendingSong>(
            "SELECT * FROM ( \
                SELECT s.id AS song_id, s.title, \
                    (SELECT COUNT(*) FROM play_events p \
                     WHERE p.song_id = s.id AND p.played_at >= $1) AS recent_plays, \
                    (SELECT COUNT(*) FROM download_events d \
                     WHERE d.song_id = s.id AND d.downloaded_at >= $1) AS recent_downloads \
                FROM songs s WHERE s.is_approved = TRUE \
             ) ranked \
             WHERE recent_plays > 0 \
             ORDER BY recent_plays DESC, recent_downloads DESC, song_id \
             LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(songs)
    }

    async fn record_play(&self, play: &NewPlay) -> Result<PlayEvent> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE songs SET play_count = play_count + 1 WHERE id = $1")
            .bind(play.song_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found("song", play.song_id));
        }

        let event = sqlx::query_as::<_, PlayEvent>(&format!(
            "INSERT INTO play_events ({PLAY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PLAY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(play.song_id)
        .bind(play.user_id)
        .bind(Utc::now())
        .bind(&play.ip_address)
        .bind(&play.user_agent)
        .bind(play.duration_played)
        .bind(play.audio_quality)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn record_download(&self, download: &NewDownload) -> Result<DownloadEvent> {
        let mut tx = self.pool.begin().await?;
        let event = insert_download(&mut *tx, download).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn update_play_duration(
        &self,
        target: PlayTarget,
        user_id: Uuid,
        duration_played: i32,
    ) -> Result<bool> {
        let result = match target {
            PlayTarget::Event(play_id) => {
                sqlx::query(
                    "UPDATE play_events SET duration_played = $1 WHERE id = $2 AND user_id = $3",
                )
                .bind(duration_played)
                .bind(play_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?
            }
            PlayTarget::Latest { song_id } => {
                sqlx::query(
                    "UPDATE play_events SET duration_played = $1 \
                     WHERE id = ( \
                        SELECT id FROM play_events \
                        WHERE song_id = $2 AND user_id = $3 \
                        ORDER BY played_at DESC \
                        LIMIT 1 \
                     )",
                )
                .bind(duration_played)
                .bind(song_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn recent_plays(&self, song_id: Uuid, limit: i64) -> Result<Vec<PlayEvent>> {
        let plays = sqlx::query_as::<_, PlayEvent>(&format!(
            "SELECT {PLAY_COLUMNS} FROM play_events WHERE song_id = $1 \
             ORDER BY played_at DESC LIMIT $2"
        ))
        .bind(song_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(plays)
    }

    async fn song_stats(&self, song_id: Uuid, since: DateTime<Utc>) -> Result<Option<SongStats>> {
        let Some(counters) = sqlx::query_as::<_, SongCounters>(
            "SELECT id AS song_id, play_count, download_count FROM songs WHERE id = $1",
        )
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let (unique_listeners, avg_duration_played, total_duration_played, recent_plays): (
            i64,
            f64,
            i64,
            i64,
        ) = sqlx::query_as(
            "SELECT COUNT(DISTINCT user_id), \
                    COALESCE(AVG(duration_played), 0)::double precision, \
                    COALESCE(SUM(duration_played), 0)::bigint, \
                    COUNT(*) FILTER (WHERE played_at >= $2) \
             FROM play_events WHERE song_id = $1",
        )
        .bind(song_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let (unique_downloaders, recent_downloads): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT user_id), COUNT(*) FILTER (WHERE downloaded_at >= $2) \
             FROM download_events WHERE song_id = $1",
        )
        .bind(song_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(SongStats {
            song_id,
            plays: counters.play_count,
            downloads: counters.download_count,
            unique_listeners,
            avg_duration_played,
            total_duration_played,
            unique_downloaders,
            recent_plays,
            recent_downloads,
        }))
    }

    async fn toggle_follow(&self, follower_id: Uuid, artist_id: Uuid) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO follows (follower_id, artist_id, followed_at) VALUES ($1, $2, $3) \
             ON CONFLICT (follower_id, artist_id) DO NOTHING",
        )
        .bind(follower_id)
        .bind(artist_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(true);
        }

        sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND artist_id = $2")
            .bind(follower_id)
            .bind(artist_id)
            .execute(&self.pool)
            .await?;
        Ok(false)
    }

    async fn toggle_like(&self, user_id: Uuid, song_id: Uuid) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO likes (user_id, song_id, liked_at) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, song_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(song_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(true);
        }

        sqlx::query("DELETE FROM likes WHERE user_id = $1 AND song_id = $2")
            .bind(user_id)
            .bind(song_id)
            .execute(&self.pool)
            .await?;
        Ok(false)
    }

    async fn count_followers(&self, artist_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE artist_id = $1")
            .bind(artist_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_likes(&self, song_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE song_id = $1")
            .bind(song_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.plan)
        .bind(payment.amount_cents)
        .bind(payment.network)
        .bind(&payment.phone_number)
        .bind(&payment.transaction_id)
        .bind(&payment.provider_reference)
        .bind(payment.status)
        .bind(payment.created_at)
        .bind(payment.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_payment(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn complete_payment_and_upgrade(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
        terms: &UpgradeTerms,
    ) -> Result<Option<Subscription>> {
        let mut tx = self.pool.begin().await?;
        let payer: Option<Uuid> = sqlx::query_scalar(
            "UPDATE payments SET status = 'completed', completed_at = $2 \
             WHERE transaction_id = $1 AND status = 'pending' \
             RETURNING user_id",
        )
        .bind(transaction_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = payer else {
            return Ok(None);
        };
        let sub = upsert_upgrade(&mut *tx, user_id, terms).await?;
        tx.commit().await?;
        Ok(Some(sub))
    }

    async fn fail_payment(&self, transaction_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'failed' WHERE transaction_id = $1 AND status = 'pending'",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
