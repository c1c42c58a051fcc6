// Library exports for testing and reuse

pub mod auth_token;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routing;
pub mod session;
