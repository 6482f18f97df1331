// src/main.rs
use actix_web::{App, HttpServer, middleware::Logger, web};
use music_paywall::config::Config;
use music_paywall::db::{self, PgStore};
use music_paywall::payments::{MobileMoneyGateway, SimulatedGateway};
use music_paywall::{UsageEngine, paywall};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    dotenv::dotenv().ok();
    let config = Config::from_env().map_err(|e| {
        tracing::error!("Failed to load config from environment: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    tracing::info!("Starting music paywall service on {}", config.bind_address);

    let pool = db::connect(&config.database_url, config.database_max_connections)
        .await
        .map_err(std::io::Error::other)?;
    db::migrate(&pool).await.map_err(std::io::Error::other)?;

    let engine = UsageEngine::new(Arc::new(PgStore::new(pool)), config.earnings_cache_ttl());
    let gateway: Arc<dyn MobileMoneyGateway> = Arc::new(SimulatedGateway);
    let bind_address = config.bind_address.clone();

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(engine.clone()))
            .app_data(web::Data::from(gateway.clone()))
            .app_data(web::Data::new(config.clone()))
            .wrap(Logger::default())
            .configure(paywall::init_routes)
    })
    .bind(bind_address)?
    .run()
    .await
}
