use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use anyhow::Context;
use mongodb::Client;
use tokio::time;

use shop_server::{
    auth_token::TokenCodec,
    config::ServerConfig,
    db::MongoDbContext,
    dispatch::{http::dispatch_request, Dispatcher},
    handlers::{self, AppState},
    middleware::{AuthorizationGate, RateLimiter},
    session::SessionCookies,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (for development)
    // Try loading from current directory first, then from server/ directory
    if dotenvy::dotenv().is_err() {
        dotenvy::from_filename("server/.env").ok();
    }

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting shop server...");

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "server/config/shop.toml".to_string());
    let mut config = ServerConfig::load_from_file(&config_path).with_context(|| {
        format!("Failed to load configuration from '{config_path}' (set CONFIG_PATH or run from the repository root)")
    })?;
    config.apply_env_overrides();

    let table = Arc::new(config.route_table().context("Invalid route configuration")?);
    log::info!("Loaded {} routes", table.len());

    let tokens = TokenCodec::new(
        config.auth.secret.as_bytes().to_vec(),
        config.auth.algorithm,
        config.auth.token_ttl(),
    )
    .context("Invalid auth settings (is AUTH_SECRET at least 32 bytes?)")?;
    log::info!(
        "Session tokens signed with {}, valid for {}s",
        tokens.algorithm(),
        tokens.ttl().as_secs()
    );

    log::info!("Connecting to MongoDB at {}...", config.database.uri);
    let client = Client::with_uri_str(&config.database.uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let db_context = MongoDbContext::new(client, &config.database.name);
    db_context
        .ping()
        .await
        .context("MongoDB did not answer ping")?;
    log::info!("Connected to database '{}'", config.database.name);

    log::info!("Initializing database indexes...");
    db_context
        .init_indexes()
        .await
        .context("Failed to initialize database indexes")?;

    let state = AppState::new(db_context, tokens.clone());
    let registry = handlers::build_registry(&state).context("Failed to register handlers")?;
    log::info!("Registered {} handlers", registry.len());

    let rate_limiter = RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window());
    let dispatcher = Dispatcher::new(
        table,
        registry,
        AuthorizationGate::new(tokens),
        config.auth.check_order,
    )
    .context("Route table references unknown handlers")?
    .with_rate_limiter(rate_limiter.clone());
    log::info!("Auth/body check order: {:?}", dispatcher.check_order());

    let cookies = SessionCookies::new(config.auth.cookie_domain.clone(), config.auth.token_ttl());

    let rate_limiter_clone = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(300)); // Every 5 minutes
        loop {
            interval.tick().await;
            let removed = rate_limiter_clone.cleanup_old_entries();
            log::debug!("Background cleanup: dropped {} idle rate limiter entries", removed);
        }
    });

    let dispatcher = web::Data::new(dispatcher);
    let cookies = web::Data::new(cookies);
    let (host, port) = (config.server.host.clone(), config.server.port);

    log::info!("Starting HTTP server at {}:{}...", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(dispatcher.clone())
            .app_data(cookies.clone())
            .app_data(web::PayloadConfig::new(1 << 20))
            .wrap(actix_middleware::Logger::default())
            .wrap(actix_middleware::Compress::default())
            // Every request goes through the configured route table
            .default_service(web::to(dispatch_request))
    })
    .bind((host, port))?
    .run()
    .await?;

    Ok(())
}
