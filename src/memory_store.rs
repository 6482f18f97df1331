// src/memory_store.rs
use crate::error::{Error, Result};
use crate::models::{
    Artist, DownloadEvent, NewDownload, NewPlay, Payment, PaymentStatus, PlayEvent, PlayTarget,
    Song, SongCounters, SongRanking, SongStats, Subscription, TrendingSong, User,
};
use crate::store::UsageStore;
use crate::subscription::UpgradeTerms;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    subscriptions: HashMap<Uuid, Subscription>,
    artists: HashMap<Uuid, Artist>,
    songs: HashMap<Uuid, Song>,
    // append order is creation order
    plays: Vec<PlayEvent>,
    downloads: Vec<DownloadEvent>,
    follows: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    likes: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    payments: HashMap<String, Payment>,
}

impl State {
    fn require_user(&self, user_id: Uuid) -> Result<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(Error::not_found("user", user_id))
        }
    }

    fn push_download(&mut self, download: &NewDownload) -> Result<DownloadEvent> {
        let song = self
            .songs
            .get_mut(&download.song_id)
            .ok_or_else(|| Error::not_found("song", download.song_id))?;
        song.download_count += 1;

        let event = DownloadEvent {
            id: Uuid::new_v4(),
            song_id: download.song_id,
            user_id: download.user_id,
            downloaded_at: Utc::now(),
            ip_address: download.ip_address.clone(),
            file_size: download.file_size,
            is_offline_download: download.is_offline_download,
            audio_quality: download.audio_quality,
        };
        self.downloads.push(event.clone());
        Ok(event)
    }
}

/// In-process store. One async mutex guards the whole state.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.id) {
            return Err(Error::InvalidState(format!("user {} already exists", user.id)));
        }
        state.users.insert(user.id, user.clone());
        state
            .subscriptions
            .insert(user.id, Subscription::free(user.id));
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.state.lock().await.subscriptions.get(&user_id).cloned())
    }

    async fn upgrade_subscription(
        &self,
        user_id: Uuid,
        terms: &UpgradeTerms,
    ) -> Result<Subscription> {
        let mut state = self.state.lock().await;
        state.require_user(user_id)?;
        let sub = state
            .subscriptions
            .entry(user_id)
            .or_insert_with(|| Subscription::free(user_id));
        sub.upgrade(terms);
        Ok(sub.clone())
    }

    async fn downgrade_subscription(&self, user_id: Uuid) -> Result<Subscription> {
        let mut state = self.state.lock().await;
        state.require_user(user_id)?;
        let sub = state
            .subscriptions
            .entry(user_id)
            .or_insert_with(|| Subscription::free(user_id));
        sub.downgrade_to_free();
        Ok(sub.clone())
    }

    async fn record_offline_download(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .subscriptions
            .get_mut(&user_id)
            .is_some_and(|sub| sub.try_record_offline_download(now)))
    }

    async fn record_offline_download_event(
        &self,
        download: &NewDownload,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadEvent>> {
        let mut state = self.state.lock().await;
        let Some(user_id) = download.user_id else {
            return Ok(None);
        };
        if !state.songs.contains_key(&download.song_id) {
            return Err(Error::not_found("song", download.song_id));
        }
        let granted = state
            .subscriptions
            .get_mut(&user_id)
            .is_some_and(|sub| sub.try_record_offline_download(now));
        if !granted {
            return Ok(None);
        }
        state.push_download(download).map(Some)
    }

    async fn ensure_artist(&self, user_id: Uuid, name: &str) -> Result<(Artist, bool)> {
        let mut state = self.state.lock().await;
        state.require_user(user_id)?;
        if let Some(artist) = state.artists.values().find(|a| a.user_id == user_id) {
            return Ok((artist.clone(), false));
        }
        let artist = Artist {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            is_verified: false,
            created_at: Utc::now(),
        };
        state.artists.insert(artist.id, artist.clone());
        Ok((artist, true))
    }

    async fn get_artist(&self, artist_id: Uuid) -> Result<Option<Artist>> {
        Ok(self.state.lock().await.artists.get(&artist_id).cloned())
    }

    async fn get_artist_by_user(&self, user_id: Uuid) -> Result<Option<Artist>> {
        let state = self.state.lock().await;
        Ok(state
            .artists
            .values()
            .find(|a| a.user_id == user_id)
            .cloned())
    }

    async fn set_artist_verified(&self, artist_id: Uuid, verified: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.artists.get_mut(&artist_id) {
            Some(artist) => {
                artist.is_verified = verified;
                true
            }
            None => false,
        })
    }

    async fn create_song(&self, song: &Song) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.artists.contains_key(&song.artist_id) {
            return Err(Error::not_found("artist", song.artist_id));
        }
        state.songs.insert(song.id, song.clone());
        Ok(())
    }

    async fn get_song(&self, song_id: Uuid) -> Result<Option<Song>> {
        Ok(self.state.lock().await.songs.get(&song_id).cloned())
    }

    async fn set_song_approved(&self, song_id: Uuid, approved: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.songs.get_mut(&song_id) {
            Some(song) => {
                song.is_approved = approved;
                true
            }
            None => false,
        })
    }

    async fn reset_song_counters(&self, song_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.songs.get_mut(&song_id) {
            Some(song) => {
                song.play_count = 0;
                song.download_count = 0;
                true
            }
            None => false,
        })
    }

    async fn approved_song_counters(&self, artist_id: Uuid) -> Result<Vec<SongCounters>> {
        let state = self.state.lock().await;
        Ok(state
            .songs
            .values()
            .filter(|s| s.artist_id == artist_id && s.is_approved)
            .map(|s| SongCounters {
                song_id: s.id,
                play_count: s.play_count,
                download_count: s.download_count,
            })
            .collect())
    }

    async fn top_songs(&self, ranking: SongRanking, limit: i64) -> Result<Vec<Song>> {
        let state = self.state.lock().await;
        let mut songs: Vec<Song> = state.songs.values().filter(|s| s.is_approved).cloned().collect();
        songs.sort_by(|a, b| {
            let (a_count, b_count) = match ranking {
                SongRanking::MostPlayed => (a.play_count, b.play_count),
                SongRanking::MostDownloaded => (a.download_count, b.download_count),
            };
            b_count
                .cmp(&a_count)
                .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
        });
        songs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(songs)
    }

    async fn trending_songs(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<TrendingSong>> {
        let state = self.state.lock().await;
        let mut trending: Vec<TrendingSong> = state
            .songs
            .values()
            .filter(|s| s.is_approved)
            .map(|s| TrendingSong {
                song_id: s.id,
                title: s.title.clone(),
                recent_plays: state
                    .plays
                    .iter()
                    .filter(|p| p.song_id == s.id && p.played_at >= since)
                    .count() as i64,
                recent_downloads: state
                    .downloads
                    .iter()
                    .filter(|d| d.song_id == s.id && d.downloaded_at >= since)
                    .count() as i64,
            })
            .filter(|t| t.recent_plays > 0)
            .collect();
        trending.sort_by(|a, b| {
            b.recent_plays
                .cmp(&a.recent_plays)
                .then_with(|| b.recent_downloads.cmp(&a.recent_downloads))
                .then_with(|| a.song_id.cmp(&b.song_id))
        });
        trending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(trending)
    }

    async fn record_play(&self, play: &NewPlay) -> Result<PlayEvent> {
        let mut state = self.state.lock().await;
        let song = state
            .songs
            .get_mut(&play.song_id)
            .ok_or_else(|| Error::not_found("song", play.song_id))?;
        song.play_count += 1;

        let event = PlayEvent {
            id: Uuid::new_v4(),
            song_id: play.song_id,
            user_id: play.user_id,
            played_at: Utc::now(),
            ip_address: play.ip_address.clone(),
            user_agent: play.user_agent.clone(),
            duration_played: play.duration_played,
            audio_quality: play.audio_quality,
        };
        state.plays.push(event.clone());
        Ok(event)
    }

    async fn record_download(&self, download: &NewDownload) -> Result<DownloadEvent> {
        self.state.lock().await.push_download(download)
    }

    async fn update_play_duration(
        &self,
        target: PlayTarget,
        user_id: Uuid,
        duration_played: i32,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let event = match target {
            PlayTarget::Event(id) => state
                .plays
                .iter_mut()
                .find(|p| p.id == id && p.user_id == Some(user_id)),
            PlayTarget::Latest { song_id } => state
                .plays
                .iter_mut()
                .rev()
                .find(|p| p.song_id == song_id && p.user_id == Some(user_id)),
        };
        Ok(match event {
            Some(event) => {
                event.duration_played = duration_played;
                true
            }
            None => false,
        })
    }

    async fn recent_plays(&self, song_id: Uuid, limit: i64) -> Result<Vec<PlayEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .plays
            .iter()
            .rev()
            .filter(|p| p.song_id == song_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn song_stats(&self, song_id: Uuid, since: DateTime<Utc>) -> Result<Option<SongStats>> {
        let state = self.state.lock().await;
        let Some(song) = state.songs.get(&song_id) else {
            return Ok(None);
        };

        let plays: Vec<&PlayEvent> = state.plays.iter().filter(|p| p.song_id == song_id).collect();
        let downloads: Vec<&DownloadEvent> = state
            .downloads
            .iter()
            .filter(|d| d.song_id == song_id)
            .collect();

        let total_duration_played: i64 = plays.iter().map(|p| i64::from(p.duration_played)).sum();
        let avg_duration_played = if plays.is_empty() {
            0.0
        } else {
            total_duration_played as f64 / plays.len() as f64
        };
        let listeners: HashSet<Uuid> = plays.iter().filter_map(|p| p.user_id).collect();
        let downloaders: HashSet<Uuid> = downloads.iter().filter_map(|d| d.user_id).collect();

        Ok(Some(SongStats {
            song_id,
            plays: song.play_count,
            downloads: song.download_count,
            unique_listeners: listeners.len() as i64,
            avg_duration_played,
            total_duration_played,
            unique_downloaders: downloaders.len() as i64,
            recent_plays: plays.iter().filter(|p| p.played_at >= since).count() as i64,
            recent_downloads: downloads
                .iter()
                .filter(|d| d.downloaded_at >= since)
                .count() as i64,
        }))
    }

    async fn toggle_follow(&self, follower_id: Uuid, artist_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.require_user(follower_id)?;
        if !state.artists.contains_key(&artist_id) {
            return Err(Error::not_found("artist", artist_id));
        }
        Ok(toggle_edge(&mut state.follows, (follower_id, artist_id)))
    }

    async fn toggle_like(&self, user_id: Uuid, song_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.require_user(user_id)?;
        if !state.songs.contains_key(&song_id) {
            return Err(Error::not_found("song", song_id));
        }
        Ok(toggle_edge(&mut state.likes, (user_id, song_id)))
    }

    async fn count_followers(&self, artist_id: Uuid) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.follows.keys().filter(|(_, a)| *a == artist_id).count() as i64)
    }

    async fn count_likes(&self, song_id: Uuid) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.likes.keys().filter(|(_, s)| *s == song_id).count() as i64)
    }

    async fn create_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_user(payment.user_id)?;
        if state.payments.contains_key(&payment.transaction_id) {
            return Err(Error::InvalidState(format!(
                "duplicate transaction {}",
                payment.transaction_id
            )));
        }
        state
            .payments
            .insert(payment.transaction_id.clone(), payment.clone());
        Ok(())
    }

    async fn get_payment(&self, transaction_id: &str) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(transaction_id).cloned())
    }

    async fn complete_payment_and_upgrade(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
        terms: &UpgradeTerms,
    ) -> Result<Option<Subscription>> {
        let mut state = self.state.lock().await;
        let user_id = match state.payments.get(transaction_id) {
            Some(p) if p.status == PaymentStatus::Pending => p.user_id,
            _ => return Ok(None),
        };
        state.require_user(user_id)?;

        if let Some(p) = state.payments.get_mut(transaction_id) {
            p.status = PaymentStatus::Completed;
            p.completed_at = Some(now);
        }
        let sub = state
            .subscriptions
            .entry(user_id)
            .or_insert_with(|| Subscription::free(user_id));
        sub.upgrade(terms);
        Ok(Some(sub.clone()))
    }

    async fn fail_payment(&self, transaction_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.payments.get_mut(transaction_id) {
            Some(p) if p.status == PaymentStatus::Pending => {
                p.status = PaymentStatus::Failed;
                true
            }
            _ => false,
        })
    }
}

/// Get-or-create, delete-if-existed.
fn toggle_edge(edges: &mut HashMap<(Uuid, Uuid), DateTime<Utc>>, key: (Uuid, Uuid)) -> bool {
    if edges.remove(&key).is_some() {
        false
    } else {
        edges.insert(key, Utc::now());
        true
    }
}
