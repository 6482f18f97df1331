// src/paywall.rs
use crate::auth::{MaybePrincipal, Principal};
use crate::engine::UsageEngine;
use crate::error::{Error, Result};
use crate::models::{
    DownloadRequest, PlayDurationRequest, PurchaseRequest, TopSongsQuery, TrendingQuery,
};
use crate::payments::{self, MobileMoneyGateway};
use actix_web::{HttpRequest, HttpResponse, get, http::header, post, web};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(top_songs);
    cfg.service(trending_songs);
    cfg.service(song_access);
    cfg.service(play_song);
    cfg.service(report_play_duration);
    cfg.service(download_song);
    cfg.service(offline_download);
    cfg.service(song_stats);
    cfg.service(toggle_like);
    cfg.service(toggle_follow);
    cfg.service(artist_earnings);
    cfg.service(get_subscription);
    cfg.service(downgrade_subscription);
    cfg.service(purchase_subscription);
    cfg.service(payment_status);
}

// First X-Forwarded-For hop, else the peer address
fn client_ip(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
}

const DEFAULT_RANKING_LIMIT: i64 = 20;
const DEFAULT_TRENDING_DAYS: u32 = 7;

fn user_agent(req: &HttpRequest) -> &str {
    req.headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

#[get("/songs/top")]
pub async fn top_songs(
    engine: web::Data<UsageEngine>,
    query: web::Query<TopSongsQuery>,
) -> Result<HttpResponse> {
    let songs = engine
        .top_songs(query.by, query.limit.unwrap_or(DEFAULT_RANKING_LIMIT))
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "by": query.by,
        "songs": songs,
    })))
}

#[get("/songs/trending")]
pub async fn trending_songs(
    engine: web::Data<UsageEngine>,
    query: web::Query<TrendingQuery>,
) -> Result<HttpResponse> {
    let days = query.days.unwrap_or(DEFAULT_TRENDING_DAYS);
    let songs = engine
        .trending_songs(days, query.limit.unwrap_or(DEFAULT_RANKING_LIMIT))
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "days": days,
        "songs": songs,
    })))
}

#[get("/songs/{song_id}/access")]
pub async fn song_access(
    engine: web::Data<UsageEngine>,
    principal: MaybePrincipal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let song_id = path.into_inner();
    let can_access = engine.can_access(song_id, principal.0).await?;
    Ok(HttpResponse::Ok().json(json!({
        "song_id": song_id,
        "can_access": can_access,
    })))
}

#[post("/songs/{song_id}/play")]
pub async fn play_song(
    engine: web::Data<UsageEngine>,
    principal: MaybePrincipal,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let (song, event) = engine
        .play(path.into_inner(), principal.0, client_ip(&req), user_agent(&req))
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "play_id": event.id,
        "song_id": song.id,
        "title": song.title,
        "duration": song.duration,
        "audio_quality": event.audio_quality,
    })))
}

#[post("/songs/{song_id}/play/duration")]
pub async fn report_play_duration(
    engine: web::Data<UsageEngine>,
    principal: Principal,
    path: web::Path<Uuid>,
    body: web::Json<PlayDurationRequest>,
) -> Result<HttpResponse> {
    let updated = engine
        .update_play_duration(body.play_id, path.into_inner(), principal.0, body.duration_played)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

#[post("/songs/{song_id}/download")]
pub async fn download_song(
    engine: web::Data<UsageEngine>,
    principal: MaybePrincipal,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: Option<web::Json<DownloadRequest>>,
) -> Result<HttpResponse> {
    let file_size = body.map(|b| b.file_size).unwrap_or_default();
    let event = engine
        .download(path.into_inner(), principal.0, client_ip(&req), file_size)
        .await?;
    Ok(HttpResponse::Ok().json(event))
}

#[post("/songs/{song_id}/offline-download")]
pub async fn offline_download(
    engine: web::Data<UsageEngine>,
    principal: Principal,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: Option<web::Json<DownloadRequest>>,
) -> Result<HttpResponse> {
    let file_size = body.map(|b| b.file_size).unwrap_or_default();
    let event = engine
        .download_for_offline(path.into_inner(), principal.0, client_ip(&req), file_size)
        .await?;
    let sub = engine.subscription(principal.0).await?;
    Ok(HttpResponse::Ok().json(json!({
        "download": event,
        "offline_downloads_used": sub.offline_downloads_used,
        "offline_download_quota": sub.offline_download_quota,
    })))
}

#[get("/songs/{song_id}/stats")]
pub async fn song_stats(
    engine: web::Data<UsageEngine>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let stats = engine.song_stats(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[post("/songs/{song_id}/like")]
pub async fn toggle_like(
    engine: web::Data<UsageEngine>,
    principal: Principal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let song_id = path.into_inner();
    let liked = engine.toggle_like(principal.0, song_id).await?;
    let like_count = engine.like_count(song_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "liked": liked,
        "like_count": like_count,
    })))
}

#[post("/artists/{artist_id}/follow")]
pub async fn toggle_follow(
    engine: web::Data<UsageEngine>,
    principal: Principal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let artist_id = path.into_inner();
    let following = engine.toggle_follow(principal.0, artist_id).await?;
    let follower_count = engine.follower_count(artist_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "following": following,
        "follower_count": follower_count,
    })))
}

#[get("/artists/{artist_id}/earnings")]
pub async fn artist_earnings(
    engine: web::Data<UsageEngine>,
    principal: Principal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let artist = engine.artist(path.into_inner()).await?;
    if artist.user_id != principal.0 {
        return Err(Error::Forbidden("earnings are visible to the artist only".into()));
    }
    let earnings = engine.compute_earnings(artist.id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "artist_id": artist.id,
        "earnings": earnings,
    })))
}

#[get("/subscription")]
pub async fn get_subscription(
    engine: web::Data<UsageEngine>,
    principal: Principal,
) -> Result<HttpResponse> {
    let sub = engine.subscription(principal.0).await?;
    let now = Utc::now();
    Ok(HttpResponse::Ok().json(json!({
        "plan": sub.plan,
        "plan_name": sub.plan.display_name(),
        "since": sub.since,
        "expires": sub.expires,
        "is_active": sub.is_active_at(now),
        "days_until_expiry": sub.days_until_expiry(now),
        "offline_downloads_used": sub.offline_downloads_used,
        "offline_download_quota": sub.offline_download_quota,
        "can_download_offline": sub.can_download_offline_at(now),
    })))
}

#[post("/subscription/downgrade")]
pub async fn downgrade_subscription(
    engine: web::Data<UsageEngine>,
    principal: Principal,
) -> Result<HttpResponse> {
    let sub = engine.downgrade_to_free(principal.0).await?;
    Ok(HttpResponse::Ok().json(sub))
}

#[post("/payments")]
pub async fn purchase_subscription(
    engine: web::Data<UsageEngine>,
    gateway: web::Data<dyn MobileMoneyGateway>,
    principal: Principal,
    purchase_req: web::Json<PurchaseRequest>,
) -> Result<HttpResponse> {
    let payment = payments::initiate_payment(
        &engine,
        gateway.get_ref(),
        principal.0,
        purchase_req.plan,
        purchase_req.network,
        &purchase_req.phone_number,
    )
    .await?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Payment initiated. Approve the prompt on your phone.",
        "transaction_id": payment.transaction_id,
        "amount_cents": payment.amount_cents,
        "status": payment.status,
    })))
}

#[get("/payments/{transaction_id}/status")]
pub async fn payment_status(
    engine: web::Data<UsageEngine>,
    gateway: web::Data<dyn MobileMoneyGateway>,
    principal: Principal,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let transaction_id = path.into_inner();
    let payment =
        payments::check_payment_status(&engine, gateway.get_ref(), principal.0, &transaction_id)
            .await?;
    Ok(HttpResponse::Ok().json(json!({
        "transaction_id": payment.transaction_id,
        "plan": payment.plan,
        "status": payment.status,
        "completed_at": payment.completed_at,
    })))
}
