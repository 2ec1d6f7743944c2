pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod modules;
pub mod pricing;
pub mod utils;

pub use db::DbPool;

use config::Config;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        Self { config, db }
    }
}
