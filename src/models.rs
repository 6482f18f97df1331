// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription tier of a principal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "subscription_plan", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Premium,
    PremiumPlus,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "audio_quality", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Standard,
    High,
    Ultra,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "mobile_network", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MobileNetwork {
    Mtn,
    Airtel,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct Artist {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// An uploaded track. Counters only move through the usage store.
#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct Song {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub duration: i32,
    pub play_count: i64,
    pub download_count: i64,
    pub is_premium_only: bool,
    pub preview_duration: i32,
    pub is_approved: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewSong {
    pub title: String,
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub is_premium_only: bool,
    #[serde(default = "default_preview_duration")]
    pub preview_duration: i32,
}

fn default_preview_duration() -> i32 {
    30
}

/// Stored subscription state, one row per principal.
///
/// `expires = None` on a paid plan means a lifetime subscription.
/// `offline_download_quota = 0` means unlimited.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, FromRow)]
pub struct Subscription {
    pub user_id: Uuid,
    pub plan: Plan,
    pub since: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub offline_downloads_used: i64,
    pub offline_download_quota: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct PlayEvent {
    pub id: Uuid,
    pub song_id: Uuid,
    pub user_id: Option<Uuid>,
    pub played_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub duration_played: i32,
    pub audio_quality: AudioQuality,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct DownloadEvent {
    pub id: Uuid,
    pub song_id: Uuid,
    pub user_id: Option<Uuid>,
    pub downloaded_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub file_size: i64,
    pub is_offline_download: bool,
    pub audio_quality: AudioQuality,
}

#[derive(Clone, Debug)]
pub struct NewPlay {
    pub song_id: Uuid,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub duration_played: i32,
    pub audio_quality: AudioQuality,
}

#[derive(Clone, Debug)]
pub struct NewDownload {
    pub song_id: Uuid,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub file_size: i64,
    pub is_offline_download: bool,
    pub audio_quality: AudioQuality,
}

/// Which play event a late duration report refers to.
#[derive(Clone, Copy, Debug)]
pub enum PlayTarget {
    Event(Uuid),
    /// Most recent play of the song by the reporting principal
    Latest { song_id: Uuid },
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, FromRow)]
pub struct SongCounters {
    pub song_id: Uuid,
    pub play_count: i64,
    pub download_count: i64,
}

/// Counter used to rank the all-time top songs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SongRanking {
    #[default]
    MostPlayed,
    MostDownloaded,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq, FromRow)]
pub struct TrendingSong {
    pub song_id: Uuid,
    pub title: String,
    pub recent_plays: i64,
    pub recent_downloads: i64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SongStats {
    pub song_id: Uuid,
    pub plays: i64,
    pub downloads: i64,
    pub unique_listeners: i64,
    pub avg_duration_played: f64,
    pub total_duration_played: i64,
    pub unique_downloaders: i64,
    pub recent_plays: i64,
    pub recent_downloads: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: Plan,
    pub amount_cents: i64,
    pub network: MobileNetwork,
    pub phone_number: String,
    pub transaction_id: String,
    pub provider_reference: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: usize,
}

#[derive(Serialize, Deserialize)]
pub struct PlayDurationRequest {
    pub play_id: Option<Uuid>,
    #[serde(default)]
    pub duration_played: i32,
}

#[derive(Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub file_size: i64,
}

#[derive(Serialize, Deserialize, Default)]
pub struct TopSongsQuery {
    #[serde(default)]
    pub by: SongRanking,
    pub limit: Option<i64>,
}

#[derive(Serialize, Deserialize, Default)]
pub struct TrendingQuery {
    pub days: Option<u32>,
    pub limit: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub plan: Plan,
    pub network: MobileNetwork,
    pub phone_number: String,
}
