use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub http_addr: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let db_max_connections = env_or("DB_MAX_CONNECTIONS", 10)?;
        let db_acquire_timeout_secs = env_or("DB_ACQUIRE_TIMEOUT_SECS", 5)?;

        Ok(Self {
            database_url,
            http_addr,
            db_max_connections,
            db_acquire_timeout_secs,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a number")),
        Err(_) => Ok(default),
    }
}
