use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use routes::ws::ConnectionRegistry;

pub mod clients;
pub mod config;
pub mod error;
pub mod middleware;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub http: reqwest::Client,
    pub registry: Arc<ConnectionRegistry>,
}
