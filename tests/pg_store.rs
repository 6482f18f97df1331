// tests/pg_store.rs: run with DATABASE_URL set and --ignored.
use chrono::{Duration, Utc};
use music_paywall::db::PgStore;
use music_paywall::engine::UsageEngine;
use music_paywall::error::Error;
use music_paywall::models::{
    AudioQuality, MobileNetwork, NewDownload, NewSong, Payment, PaymentStatus, Plan, Song,
    SongRanking,
};
use music_paywall::store::UsageStore;
use music_paywall::subscription::UpgradeTerms;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

fn engine(pool: PgPool) -> UsageEngine {
    UsageEngine::new(Arc::new(PgStore::new(pool)), std::time::Duration::ZERO)
}

async fn approved_song(engine: &UsageEngine, owner: Uuid, premium: bool) -> Song {
    let song = engine
        .publish_song(
            owner,
            "artist",
            NewSong {
                title: "Entebbe Road".to_string(),
                duration: 240,
                is_premium_only: premium,
                preview_duration: 30,
            },
        )
        .await
        .unwrap();
    engine.set_song_approved(song.id, true).await.unwrap();
    song
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn concurrent_plays_are_all_counted(pool: PgPool) {
    const N: usize = 32;
    let engine = engine(pool.clone());
    let artist = engine.register_user("artist").await.unwrap();
    let song = approved_song(&engine, artist.id, false).await;

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.record_play(song.id, None, None, "load", 0).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let play_count: i64 = sqlx::query_scalar("SELECT play_count FROM songs WHERE id = $1")
        .bind(song.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM play_events WHERE song_id = $1")
        .bind(song.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(play_count, N as i64);
    assert_eq!(events, N as i64);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn concurrent_offline_downloads_respect_quota(pool: PgPool) {
    let engine = engine(pool);
    let user = engine.register_user("listener").await.unwrap();
    engine.upgrade(user.id, Plan::Premium, 30).await.unwrap();

    let handles: Vec<_> = (0..120)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.record_offline_download(user.id).await })
        })
        .collect();
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 100);
    let sub = engine.subscription(user.id).await.unwrap();
    assert_eq!(sub.offline_downloads_used, 100);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn lapsed_plan_is_kept_until_downgrade(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let engine = engine(pool);
    let user = engine.register_user("listener").await.unwrap();

    let terms = UpgradeTerms::new(Plan::PremiumPlus, 30, Utc::now() - Duration::days(40)).unwrap();
    store.upgrade_subscription(user.id, &terms).await.unwrap();
    let sub = engine.subscription(user.id).await.unwrap();
    assert_eq!(sub.plan, Plan::PremiumPlus);
    assert!(!sub.is_active());
    assert!(!engine.record_offline_download(user.id).await.unwrap());

    let sub = engine.downgrade_to_free(user.id).await.unwrap();
    assert_eq!(sub.plan, Plan::Free);
    assert_eq!(sub.offline_download_quota, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn toggles_leave_no_rows_after_two_calls(pool: PgPool) {
    let engine = engine(pool.clone());
    let artist_user = engine.register_user("artist").await.unwrap();
    let fan = engine.register_user("fan").await.unwrap();
    let song = approved_song(&engine, artist_user.id, false).await;
    engine.set_artist_verified(song.artist_id, true).await.unwrap();

    assert!(engine.toggle_follow(fan.id, song.artist_id).await.unwrap());
    assert!(!engine.toggle_follow(fan.id, song.artist_id).await.unwrap());
    assert!(engine.toggle_like(fan.id, song.id).await.unwrap());
    assert!(!engine.toggle_like(fan.id, song.id).await.unwrap());

    let follows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows")
        .fetch_one(&pool)
        .await
        .unwrap();
    let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!((follows, likes), (0, 0));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn payment_completes_once(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let engine = engine(pool);
    let user = engine.register_user("buyer").await.unwrap();
    let payment = Payment {
        id: Uuid::new_v4(),
        user_id: user.id,
        plan: Plan::Premium,
        amount_cents: 499,
        network: MobileNetwork::Mtn,
        phone_number: "0771234567".to_string(),
        transaction_id: "MTN_ABCDEF12".to_string(),
        provider_reference: "MTNREFABCDEF12".to_string(),
        status: PaymentStatus::Pending,
        created_at: Utc::now(),
        completed_at: None,
    };
    store.create_payment(&payment).await.unwrap();

    let now = Utc::now();
    let terms = UpgradeTerms::new(Plan::Premium, 30, now).unwrap();
    let sub = store
        .complete_payment_and_upgrade("MTN_ABCDEF12", now, &terms)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.plan, Plan::Premium);
    assert_eq!(sub.offline_download_quota, 100);
    assert!(
        store
            .complete_payment_and_upgrade("MTN_ABCDEF12", now, &terms)
            .await
            .unwrap()
            .is_none()
    );
    assert!(!store.fail_payment("MTN_ABCDEF12").await.unwrap());
    let stored = store.get_payment("MTN_ABCDEF12").await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.completed_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn stats_aggregate_events(pool: PgPool) {
    let engine = engine(pool);
    let artist = engine.register_user("artist").await.unwrap();
    let listener = engine.register_user("listener").await.unwrap();
    let song = approved_song(&engine, artist.id, false).await;

    engine
        .record_play(song.id, Some(listener.id), None, "", 60)
        .await
        .unwrap();
    engine
        .record_play(song.id, Some(listener.id), None, "", 120)
        .await
        .unwrap();
    engine.record_play(song.id, None, None, "", 0).await.unwrap();
    engine
        .record_download(song.id, Some(listener.id), None, 2048)
        .await
        .unwrap();

    let stats = engine.song_stats(song.id).await.unwrap();
    assert_eq!(stats.plays, 3);
    assert_eq!(stats.downloads, 1);
    assert_eq!(stats.unique_listeners, 1);
    assert_eq!(stats.total_duration_played, 180);
    assert!((stats.avg_duration_played - 60.0).abs() < 1e-9);
    assert_eq!(stats.unique_downloaders, 1);
    assert_eq!(stats.recent_plays, 3);

    let earnings = engine.compute_earnings(song.artist_id).await.unwrap();
    assert!((earnings.total_earnings - 0.006).abs() < 1e-9);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn offline_slot_is_returned_when_the_download_cannot_be_recorded(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let engine = engine(pool);
    let user = engine.register_user("listener").await.unwrap();
    engine.upgrade(user.id, Plan::Premium, 30).await.unwrap();

    let missing_song = NewDownload {
        song_id: Uuid::new_v4(),
        user_id: Some(user.id),
        ip_address: None,
        file_size: 0,
        is_offline_download: true,
        audio_quality: AudioQuality::High,
    };
    let err = store
        .record_offline_download_event(&missing_song, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(engine.subscription(user.id).await.unwrap().offline_downloads_used, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn rankings_cover_approved_songs(pool: PgPool) {
    let engine = engine(pool);
    let artist = engine.register_user("artist").await.unwrap();
    let quiet = approved_song(&engine, artist.id, false).await;
    let loud = approved_song(&engine, artist.id, false).await;
    for _ in 0..3 {
        engine.record_play(loud.id, None, None, "", 0).await.unwrap();
    }
    engine.record_play(quiet.id, None, None, "", 0).await.unwrap();
    engine.record_download(quiet.id, None, None, 0).await.unwrap();

    let top = engine.top_songs(SongRanking::MostPlayed, 10).await.unwrap();
    assert_eq!(top[0].id, loud.id);
    let top = engine.top_songs(SongRanking::MostDownloaded, 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, quiet.id);

    let trending = engine.trending_songs(7, 10).await.unwrap();
    assert_eq!(trending.len(), 2);
    assert_eq!(trending[0].song_id, loud.id);
    assert_eq!(trending[0].recent_plays, 3);
    assert_eq!(trending[1].recent_downloads, 1);
}
