use std::sync::Arc;
use std::time::Duration;

use mongodb::Client;
use serial_test::serial;

use shop_server::{
    auth_token::{HashAlgorithm, TokenCodec},
    config::ServerConfig,
    db::MongoDbContext,
    dispatch::{CheckOrder, Dispatcher},
    handlers::{build_registry, AppState},
    middleware::AuthorizationGate,
    routing::{HandlerRef, Role},
};

const SHOP_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/shop.toml");

fn load() -> ServerConfig {
    ServerConfig::load_from_file(SHOP_CONFIG).expect("Failed to load config")
}

fn codec() -> TokenCodec {
    TokenCodec::new(
        b"config-test-secret-0123456789abcdef".to_vec(),
        HashAlgorithm::Hs256,
        Duration::from_secs(60),
    )
    .unwrap()
}

#[test]
fn test_load_shop_config() {
    let config = load();

    assert_eq!(config.server.port, 8080);
    assert_eq!(config.database.name, "greenhouse");
    assert_eq!(config.auth.algorithm, HashAlgorithm::Hs256);
    assert_eq!(config.auth.check_order, CheckOrder::AuthFirst);
    assert_eq!(config.auth.token_ttl(), Duration::from_secs(86400));
    assert!(config.auth.secret.is_empty(), "secrets belong in the environment");
}

#[test]
fn test_shop_routes_build_a_table() {
    let config = load();
    let table = config.route_table().expect("routes should validate");

    assert_eq!(table.len(), config.routes.len());
    assert!(table.len() > 40);
}

#[test]
fn test_shop_route_flags() {
    let config = load();
    let table = config.route_table().unwrap();
    let route = |pattern: &str| {
        table
            .all_routes()
            .find(|(p, _)| *p == pattern)
            .map(|(_, route)| route)
            .unwrap_or_else(|| panic!("missing route {pattern}"))
    };

    let logout = route("/api/auth/logout");
    assert!(logout.auth_required);
    assert!(logout.body_optional);

    let login = route("/api/auth/login");
    assert!(!login.auth_required);
    assert!(login.rate_limited);

    let delete_category = route("/api/category/delete/:id");
    assert_eq!(delete_category.required_role, Role::Admin);

    let add_to_cart = route("/api/cart/add");
    assert_eq!(add_to_cart.required_role, Role::Customer);
    assert!(!add_to_cart.body_optional);

    assert!(!route("/api/product/id/:id").auth_required);
}

#[test]
fn test_patterns_are_unique() {
    let config = load();
    let mut patterns: Vec<&str> = config.routes.iter().map(|r| r.pattern.as_str()).collect();
    let total = patterns.len();
    patterns.sort_unstable();
    patterns.dedup();
    assert_eq!(patterns.len(), total);
}

#[actix_web::test]
async fn test_registry_covers_every_route() {
    let config = load();
    let table = Arc::new(config.route_table().unwrap());

    // Client construction is lazy; nothing connects here.
    let client = Client::with_uri_str("mongodb://127.0.0.1:27017").await.unwrap();
    let state = AppState::new(MongoDbContext::new(client, "greenhouse_test"), codec());
    let registry = build_registry(&state).unwrap();

    for (pattern, route) in table.all_routes() {
        assert!(
            registry.contains(&route.handler_ref),
            "{pattern} -> {} is not registered",
            route.handler_ref
        );
    }
    assert!(registry.contains(&HandlerRef::parse("HealthController@check").unwrap()));

    Dispatcher::new(table, registry, AuthorizationGate::new(codec()), config.auth.check_order)
        .expect("dispatcher accepts the shipped configuration");
}

#[test]
fn test_invalid_config_path() {
    let result = ServerConfig::load_from_file("nonexistent/config.toml");
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    std::env::set_var("SERVER_PORT", "9090");
    std::env::set_var("DATABASE_NAME", "greenhouse_staging");
    std::env::set_var("AUTH_SECRET", "staging-secret-staging-secret-1234");
    std::env::set_var("COOKIE_DOMAIN", "shop.example.com");

    let mut config = load();
    config.apply_env_overrides();

    std::env::remove_var("SERVER_PORT");
    std::env::remove_var("DATABASE_NAME");
    std::env::remove_var("AUTH_SECRET");
    std::env::remove_var("COOKIE_DOMAIN");

    assert_eq!(config.server.port, 9090);
    assert_eq!(config.database.name, "greenhouse_staging");
    assert_eq!(config.auth.secret, "staging-secret-staging-secret-1234");
    assert_eq!(config.auth.cookie_domain.as_deref(), Some("shop.example.com"));
}

#[test]
#[serial]
fn test_unparseable_port_override_is_ignored() {
    std::env::set_var("SERVER_PORT", "eighty");

    let mut config = load();
    config.apply_env_overrides();

    std::env::remove_var("SERVER_PORT");

    assert_eq!(config.server.port, 8080);
}
