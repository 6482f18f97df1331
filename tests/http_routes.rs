use actix_web::{App, http::StatusCode, test, web};
use music_paywall::auth::issue_token;
use music_paywall::config::Config;
use music_paywall::engine::UsageEngine;
use music_paywall::memory_store::MemoryStore;
use music_paywall::models::{NewSong, Song, User};
use music_paywall::payments::{MobileMoneyGateway, SimulatedGateway};
use music_paywall::paywall;
use serde_json::{Value, json};
use std::sync::Arc;

const SECRET: &str = "route-test-secret";

fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        jwt_secret: SECRET.to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        database_max_connections: 1,
        earnings_cache_ttl_secs: 0,
    }
}

fn bearer(user: &User) -> (&'static str, String) {
    let token = issue_token(user.id, SECRET, chrono::Duration::hours(1)).unwrap();
    ("Authorization", format!("Bearer {token}"))
}

async fn publish(engine: &UsageEngine, owner: &User, premium: bool) -> Song {
    let song = engine
        .publish_song(
            owner.id,
            &owner.username,
            NewSong {
                title: "Boda Boda".to_string(),
                duration: 180,
                is_premium_only: premium,
                preview_duration: 30,
            },
        )
        .await
        .unwrap();
    engine.set_song_approved(song.id, true).await.unwrap();
    song
}

macro_rules! app {
    ($engine:expr) => {{
        let gateway: Arc<dyn MobileMoneyGateway> = Arc::new(SimulatedGateway);
        test::init_service(
            App::new()
                .app_data(web::Data::new($engine.clone()))
                .app_data(web::Data::from(gateway))
                .app_data(web::Data::new(test_config()))
                .configure(paywall::init_routes),
        )
        .await
    }};
}

fn engine() -> UsageEngine {
    UsageEngine::new(Arc::new(MemoryStore::new()), std::time::Duration::ZERO)
}

#[actix_web::test]
async fn anonymous_premium_play_gets_preview_hint() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let song = publish(&engine, &artist, true).await;
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri(&format!("/songs/{}/play", song.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["can_preview"], json!(true));
    assert_eq!(body["preview_duration"], json!(30));
}

#[actix_web::test]
async fn invalid_token_is_treated_as_anonymous() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    let app = app!(engine);

    let req = test::TestRequest::get()
        .uri(&format!("/songs/{}/access", song.id))
        .insert_header(("Authorization", "Bearer not-a-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["can_access"], json!(true));
}

#[actix_web::test]
async fn offline_download_requires_login() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri(&format!("/songs/{}/offline-download", song.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn play_then_report_duration() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let listener = engine.register_user("listener").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri(&format!("/songs/{}/play", song.id))
        .insert_header(bearer(&listener))
        .insert_header(("X-Forwarded-For", "198.51.100.4"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["audio_quality"], json!("standard"));

    let req = test::TestRequest::post()
        .uri(&format!("/songs/{}/play/duration", song.id))
        .insert_header(bearer(&listener))
        .set_json(json!({ "play_id": body["play_id"], "duration_played": 120 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["updated"], json!(true));

    let plays = engine.recent_plays(song.id, 10).await.unwrap();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].duration_played, 120);
    assert_eq!(plays[0].ip_address.as_deref(), Some("198.51.100.4"));
}

#[actix_web::test]
async fn mobile_money_purchase_upgrades_once() {
    let engine = engine();
    let buyer = engine.register_user("buyer").await.unwrap();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/payments")
        .insert_header(bearer(&buyer))
        .set_json(json!({
            "plan": "premium",
            "network": "mtn",
            "phone_number": "0771234567",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["amount_cents"], json!(499));
    assert_eq!(body["status"], json!("pending"));
    let transaction_id = body["transaction_id"].as_str().unwrap().to_string();
    assert!(transaction_id.starts_with("MTN_"));

    let status_uri = format!("/payments/{transaction_id}/status");
    let req = test::TestRequest::get()
        .uri(&status_uri)
        .insert_header(bearer(&buyer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], json!("completed"));

    let sub = engine.subscription(buyer.id).await.unwrap();
    assert!(sub.is_active());
    assert_eq!(sub.offline_download_quota, 100);

    let req = test::TestRequest::get()
        .uri(&status_uri)
        .insert_header(bearer(&buyer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], json!("completed"));
    assert_eq!(engine.subscription(buyer.id).await.unwrap().since, sub.since);

    let req = test::TestRequest::get()
        .uri("/subscription")
        .insert_header(bearer(&buyer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"], json!("premium"));
    assert_eq!(body["is_active"], json!(true));
    assert_eq!(body["can_download_offline"], json!(true));
}

#[actix_web::test]
async fn purchase_rejects_wrong_network_number() {
    let engine = engine();
    let buyer = engine.register_user("buyer").await.unwrap();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/payments")
        .insert_header(bearer(&buyer))
        .set_json(json!({
            "plan": "premium_plus",
            "network": "airtel",
            "phone_number": "0771234567",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn payment_status_is_private() {
    let engine = engine();
    let buyer = engine.register_user("buyer").await.unwrap();
    let other = engine.register_user("other").await.unwrap();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/payments")
        .insert_header(bearer(&buyer))
        .set_json(json!({
            "plan": "premium",
            "network": "airtel",
            "phone_number": "0701234567",
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let transaction_id = body["transaction_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/payments/{transaction_id}/status"))
        .insert_header(bearer(&other))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(!engine.subscription(other.id).await.unwrap().is_active());
}

#[actix_web::test]
async fn earnings_are_visible_to_the_artist_only() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let fan = engine.register_user("fan").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    engine.record_download(song.id, None, None, 0).await.unwrap();
    let app = app!(engine);

    let uri = format!("/artists/{}/earnings", song.artist_id);
    let req = test::TestRequest::get()
        .uri(&uri)
        .insert_header(bearer(&fan))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri(&uri)
        .insert_header(bearer(&artist))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["earnings"]["total_downloads"], json!(1));
}

#[actix_web::test]
async fn follow_and_like_report_counts() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let fan = engine.register_user("fan").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    engine.set_artist_verified(song.artist_id, true).await.unwrap();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri(&format!("/artists/{}/follow", song.artist_id))
        .insert_header(bearer(&fan))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "following": true, "follower_count": 1 }));

    let req = test::TestRequest::post()
        .uri(&format!("/songs/{}/like", song.id))
        .insert_header(bearer(&fan))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "liked": true, "like_count": 1 }));
}

#[actix_web::test]
async fn unverified_artist_cannot_be_followed() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let fan = engine.register_user("fan").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri(&format!("/artists/{}/follow", song.artist_id))
        .insert_header(bearer(&fan))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn rankings_are_public() {
    let engine = engine();
    let artist = engine.register_user("artist").await.unwrap();
    let song = publish(&engine, &artist, false).await;
    engine.record_play(song.id, None, None, "", 0).await.unwrap();
    let app = app!(engine);

    let req = test::TestRequest::get()
        .uri("/songs/top?by=most_downloaded&limit=5")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["by"], json!("most_downloaded"));
    assert_eq!(body["songs"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get().uri("/songs/trending").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["days"], json!(7));
    assert_eq!(body["songs"][0]["recent_plays"], json!(1));

    let req = test::TestRequest::get()
        .uri("/songs/trending?days=0")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
