//! Configuration module for the dispatch gateway.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default capacity of the in-process change bus.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file backing the embedded store
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Number of committed changes buffered per change-feed subscriber
    pub feed_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("DISPATCH_API_PSK").ok();

        let db_path = env::var("DISPATCH_DB_PATH")
            .unwrap_or_else(|_| "./data/dispatch.sqlite".to_string())
            .into();

        let bind_addr = env::var("DISPATCH_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid DISPATCH_BIND_ADDR format");

        let log_level = env::var("DISPATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let feed_capacity = env::var("DISPATCH_FEED_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|capacity: &usize| *capacity > 0)
            .unwrap_or(DEFAULT_FEED_CAPACITY);

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            feed_capacity,
        }
    }
}
