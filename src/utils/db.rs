use std::path::Path;

use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, SqlitePool};
use tokio::sync::OnceCell;
use anyhow::{anyhow, Error};
use sqlx::migrate::Migrator;

use crate::utils::config::get_config;

pub struct Database {
    pool: SqlitePool
}

impl Database {
    pub async fn init_application_db(db_path: &Path) -> Result<Self, Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), Error> {
        // TODO: Add migrations path to Config!
        let migrations = Migrator::new(Path::new("./data/db/migrations")).await?;
        migrations.run(&self.pool).await?;

        Ok(())
    }
}

pub async fn get_application_db() -> Result<&'static Database, Error> {
    static DB_INSTANCE: OnceCell<Result<Database, String>> = OnceCell::const_new();

    let result = DB_INSTANCE.get_or_init(|| async {
        let config = match get_config() {
            Ok(config) => config,
            Err(err) => return Err(err.to_string()),
        };

        match Database::init_application_db(&config.database.path).await {
            Ok(db) => Ok(db),
            Err(e) => Err(e.to_string()),
        }
    }).await;

    match result {
        Ok(db) => Ok(db),
        Err(msg) => Err(anyhow!("{}", msg)),
    }
}
