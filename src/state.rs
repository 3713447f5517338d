use std::sync::Arc;

use sqlx::SqlitePool;

use super::{config::Config, database::init_db, files::FileStore};

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub files: FileStore,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let pool = init_db(&config.database_url)
            .await
            .expect("Database misconfigured!");
        let files = FileStore::new(&config.data_dir).expect("Upload directory misconfigured!");

        Arc::new(Self {
            config,
            pool,
            files,
        })
    }
}
