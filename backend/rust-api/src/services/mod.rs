use std::sync::Arc;

use crate::config::Config;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use case_service::CaseService;
use case_store::Store;
use mongo_store::MongoStore;
use profile_service::ProfileService;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: Option<redis::Client>,
    ) -> anyhow::Result<Self> {
        let store = MongoStore::new(mongo_client, &config.mongo_database);
        store.ensure_indexes().await?;

        let redis = match redis_client {
            Some(client) => Some(connect_redis(client).await?),
            None => {
                tracing::warn!("Redis not configured; idempotency keys will be ignored");
                None
            }
        };

        Ok(Self {
            config,
            store: Arc::new(store),
            redis,
        })
    }

    /// State over an arbitrary store, without Redis.
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            redis: None,
        }
    }

    pub fn case_service(&self) -> CaseService {
        CaseService::new(
            self.store.clone(),
            self.redis.clone(),
            self.config.rewards.clone(),
            self.config.idempotency_ttl_seconds,
        )
    }

    pub fn profile_service(&self) -> ProfileService {
        ProfileService::new(self.store.clone(), self.config.rewards.clone())
    }
}

async fn connect_redis(client: redis::Client) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

pub mod case_engine;
pub mod case_seed;
pub mod case_service;
pub mod case_store;
pub mod memory_store;
pub mod mongo_store;
pub mod profile_service;
pub mod rewards;
