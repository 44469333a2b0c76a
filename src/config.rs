use std::env;

use anyhow::Context;
use chrono::Duration;

/// Process-wide configuration, read once at startup and never mutated.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub auth: AuthConfig,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

/// Token signing and cookie settings. Access and refresh tokens are signed
/// with distinct secrets.
#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let access_secret =
            env::var("JWT_SECRET_KEY_ACCESS").context("JWT_SECRET_KEY_ACCESS not set")?;
        let refresh_secret =
            env::var("JWT_SECRET_KEY_REFRESH").context("JWT_SECRET_KEY_REFRESH not set")?;

        let access_hours = env_parse("ACCESS_TOKEN_TTL_HOURS", 6)?;
        let refresh_days = env_parse("REFRESH_TOKEN_TTL_DAYS", 7)?;
        let port = env_parse("PORT", 4000)?;

        let secure_cookies = env::var("APP_ENV").is_ok_and(|v| v == "production");

        Ok(Self {
            port,
            database_url,
            auth: AuthConfig {
                access_secret,
                refresh_secret,
                access_ttl: Duration::hours(access_hours),
                refresh_ttl: Duration::days(refresh_days),
                secure_cookies,
            },
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} is not a valid value: {raw}")),
        Err(_) => Ok(default),
    }
}
