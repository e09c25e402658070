//! Runtime configuration read from the environment (and `.env`, when present).

use std::net::{IpAddr, SocketAddr};

use chrono::{FixedOffset, Offset, Utc};
use rand::RngCore;
use secrecy::SecretString;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://taskmind.db";
pub const DEFAULT_PROMPT_MAX_CHARS: usize = 200;
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub gemini_model: String,
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
    pub session_secret: SecretString,
    pub session_ttl_hours: i64,
    pub firebase_api_key: Option<SecretString>,
    pub utc_offset: FixedOffset,
    pub prompt_max_chars: usize,
}

impl Config {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_api_key = get("GEMINI_API_KEY")
            .map(secret)
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        let host = match get("HOST") {
            Some(raw) => parse("HOST", raw)?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = match get("PORT") {
            Some(raw) => parse("PORT", raw)?,
            None => DEFAULT_PORT,
        };
        let session_ttl_hours = match get("SESSION_TTL_HOURS") {
            Some(raw) => parse("SESSION_TTL_HOURS", raw)?,
            None => DEFAULT_SESSION_TTL_HOURS,
        };
        let prompt_max_chars = match get("PROMPT_MAX_CHARS") {
            Some(raw) => parse("PROMPT_MAX_CHARS", raw)?,
            None => DEFAULT_PROMPT_MAX_CHARS,
        };
        let utc_offset = match get("TASKMIND_UTC_OFFSET_MINUTES") {
            Some(raw) => {
                let minutes: i32 = parse("TASKMIND_UTC_OFFSET_MINUTES", raw.clone())?;
                minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or(ConfigError::Invalid {
                        name: "TASKMIND_UTC_OFFSET_MINUTES",
                        value: raw,
                    })?
            }
            None => Utc.fix(),
        };

        let session_secret = match get("SESSION_SECRET") {
            Some(value) => secret(value),
            None => {
                warn!("SESSION_SECRET not set - generating an ephemeral secret, sessions will not survive a restart");
                secret(random_secret())
            }
        };

        Ok(Self {
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            host,
            port,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            session_secret,
            session_ttl_hours,
            firebase_api_key: get("FIREBASE_API_KEY").map(secret),
            utc_offset,
            prompt_max_chars,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}

pub fn secret(value: String) -> SecretString {
    SecretString::new(value.into_boxed_str())
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
