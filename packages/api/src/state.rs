use archive_os_types::Value;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::{sync::Arc, time::Duration};

use crate::realtime::channel::DonationsChannel;
#[cfg(feature = "redis")]
use crate::realtime::presence::RedisPresence;
use crate::realtime::presence::{InMemoryPresence, PresenceStore};

pub type AppState = Arc<State>;

/// Deployment knobs read once at startup. Secrets (webhook secrets, the admin
/// token) are read from the environment at the point of use and never stored.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Currency tag applied when a provider does not declare one
    pub default_currency: String,
    pub frontend_url: String,
}

pub struct State {
    pub db: DatabaseConnection,
    pub stripe_client: Option<stripe::Client>,
    pub channel: Arc<DonationsChannel>,
    pub http_client: reqwest::Client,
    pub response_cache: moka::sync::Cache<String, Value>,
    pub settings: Settings,
}

impl State {
    pub async fn new() -> Self {
        let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let mut opt = ConnectOptions::new(db_url.to_owned());
        opt.max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let db = Database::connect(opt)
            .await
            .expect("Failed to connect to database");

        let stripe_client = match std::env::var("STRIPE_SECRET_KEY") {
            Ok(key) => Some(stripe::Client::new(key)),
            Err(_) => {
                tracing::warn!("STRIPE_SECRET_KEY not set, checkout flow disabled");
                None
            }
        };

        let channel = Arc::new(DonationsChannel::new(presence_store().await));

        // Short timeout so a hanging upstream can never pin a sync task
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("archive-os/0.1")
            .build()
            .expect("Failed to build HTTP client");

        let response_cache = moka::sync::Cache::builder()
            .max_capacity(32 * 1024 * 1024) // 32 MB
            .time_to_live(Duration::from_secs(60 * 60)) // 1 hour
            .build();

        let settings = Settings {
            default_currency: std::env::var("DONATION_CURRENCY")
                .unwrap_or_else(|_| "JPY".to_string()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        };

        Self {
            db,
            stripe_client,
            channel,
            http_client,
            response_cache,
            settings,
        }
    }

    pub fn get_cache<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.response_cache
            .get(key)
            .and_then(|json_value| serde_json::from_value(json_value).ok())
    }

    pub fn set_cache<T>(&self, key: String, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.response_cache.insert(key, json_value);
        }
    }

    pub fn invalidate_cache(&self, key: &str) {
        self.response_cache.invalidate(key);
    }
}

#[cfg(feature = "redis")]
async fn presence_store() -> Arc<dyn PresenceStore> {
    match std::env::var("REDIS_URL") {
        Ok(url) => match RedisPresence::new(&url).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                tracing::warn!("Redis presence unavailable, using in-memory counter: {}", err);
                Arc::new(InMemoryPresence::new())
            }
        },
        Err(_) => Arc::new(InMemoryPresence::new()),
    }
}

#[cfg(not(feature = "redis"))]
async fn presence_store() -> Arc<dyn PresenceStore> {
    Arc::new(InMemoryPresence::new())
}
