use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::session::{BookingId, Role, UserId};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown TRACKING_STORE '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub ws_host: String,
    pub ws_port: u16,
    pub ws_path: String,
    pub ws_ping_interval_secs: u64,
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let ws_host = env::var("WS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let ws_port = env::var("WS_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);
        let ws_path = env::var("WS_PATH").unwrap_or_else(|_| "/ws".to_string());
        let ws_ping_interval_secs = env::var("WS_PING_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let store_backend = env::var("TRACKING_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "limo".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "limo".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "limo".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            ws_host,
            ws_port,
            ws_path,
            ws_ping_interval_secs,
            store_backend,
            database_url,
            db_max_connections,
            log_level,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_secs.max(1))
    }
}

/// Settings for the reconnecting tracking client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub user_id: Option<UserId>,
    pub role: Option<Role>,
    pub booking_id: Option<BookingId>,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub handshake_retry: Duration,
    pub heartbeat_interval: Duration,
    pub log_level: String,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: None,
            role: None,
            booking_id: None,
            reconnect_base: Duration::from_millis(1000),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(5),
            handshake_retry: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }

    pub fn load() -> Result<Self> {
        dotenv().ok();

        let url = env::var("TRACKING_URL").unwrap_or_else(|_| "ws://127.0.0.1:5000/ws".to_string());
        let mut config = Self::new(url);

        config.user_id = env::var("TRACKING_USER_ID").ok().and_then(|v| v.parse().ok());
        config.role = env::var("TRACKING_ROLE").ok().and_then(|v| v.parse().ok());
        config.booking_id = env::var("TRACKING_BOOKING_ID").ok().and_then(|v| v.parse().ok());

        let reconnect_base_ms = env::var("RECONNECT_BASE_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        config.reconnect_base = Duration::from_millis(reconnect_base_ms);
        config.max_reconnect_attempts = env::var("RECONNECT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let connect_timeout_secs = env::var("CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        config.connect_timeout = Duration::from_secs(connect_timeout_secs);
        let handshake_retry_ms = env::var("HANDSHAKE_RETRY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        config.handshake_retry = Duration::from_millis(handshake_retry_ms);
        let heartbeat_secs = env::var("HEARTBEAT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        config.heartbeat_interval = Duration::from_secs(heartbeat_secs);
        config.log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(config)
    }
}
