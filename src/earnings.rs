// src/earnings.rs
use crate::models::SongCounters;
use serde::Serialize;
use uuid::Uuid;

pub const STREAM_RATE: f64 = 0.001;
pub const DOWNLOAD_RATE: f64 = 0.003;

// Thousandths of a currency unit, so sums stay exact.
const STREAM_RATE_MILLIS: i64 = 1;
const DOWNLOAD_RATE_MILLIS: i64 = 3;

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct SongEarnings {
    pub song_id: Uuid,
    pub plays: i64,
    pub downloads: i64,
    pub earnings: f64,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct Earnings {
    pub total_plays: i64,
    pub total_downloads: i64,
    pub stream_earnings: f64,
    pub download_earnings: f64,
    pub total_earnings: f64,
    /// Highest earning first.
    pub songs: Vec<SongEarnings>,
}

fn song_millis(song: &SongCounters) -> i64 {
    song.play_count * STREAM_RATE_MILLIS + song.download_count * DOWNLOAD_RATE_MILLIS
}

pub fn compute_earnings(songs: &[SongCounters]) -> Earnings {
    let total_plays: i64 = songs.iter().map(|s| s.play_count).sum();
    let total_downloads: i64 = songs.iter().map(|s| s.download_count).sum();

    let stream_millis = total_plays * STREAM_RATE_MILLIS;
    let download_millis = total_downloads * DOWNLOAD_RATE_MILLIS;

    let mut ranked: Vec<&SongCounters> = songs.iter().collect();
    ranked.sort_by_key(|s| std::cmp::Reverse(song_millis(s)));

    Earnings {
        total_plays,
        total_downloads,
        stream_earnings: millis_to_amount(stream_millis),
        download_earnings: millis_to_amount(download_millis),
        total_earnings: millis_to_amount(stream_millis + download_millis),
        songs: ranked
            .into_iter()
            .map(|s| SongEarnings {
                song_id: s.song_id,
                plays: s.play_count,
                downloads: s.download_count,
                earnings: millis_to_amount(song_millis(s)),
            })
            .collect(),
    }
}

fn millis_to_amount(millis: i64) -> f64 {
    millis as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(plays: i64, downloads: i64) -> SongCounters {
        SongCounters {
            song_id: Uuid::new_v4(),
            play_count: plays,
            download_count: downloads,
        }
    }

    #[test]
    fn single_song() {
        let earnings = compute_earnings(&[counters(100, 50)]);
        assert_eq!(earnings.total_earnings, 0.25);
        assert_eq!(earnings.stream_earnings, 0.1);
        assert_eq!(earnings.download_earnings, 0.15);
    }

    #[test]
    fn sums_across_songs() {
        let earnings = compute_earnings(&[counters(1000, 0), counters(0, 1000), counters(7, 3)]);
        assert_eq!(earnings.total_plays, 1007);
        assert_eq!(earnings.total_downloads, 1003);
        assert_eq!(earnings.total_earnings, 4.016);
    }

    #[test]
    fn per_song_breakdown_is_ranked() {
        let small = counters(10, 0);
        let big = counters(100, 50);
        let earnings = compute_earnings(&[small, big]);
        assert_eq!(earnings.songs.len(), 2);
        assert_eq!(earnings.songs[0].song_id, big.song_id);
        assert_eq!(earnings.songs[0].earnings, 0.25);
        assert_eq!(earnings.songs[1].song_id, small.song_id);
        assert_eq!(earnings.songs[1].earnings, 0.01);
    }

    #[test]
    fn empty_catalogue_earns_nothing() {
        assert_eq!(compute_earnings(&[]), Earnings::default());
    }

    #[test]
    fn rates_match_millis() {
        assert_eq!(STREAM_RATE, STREAM_RATE_MILLIS as f64 / 1000.0);
        assert_eq!(DOWNLOAD_RATE, DOWNLOAD_RATE_MILLIS as f64 / 1000.0);
    }
}
