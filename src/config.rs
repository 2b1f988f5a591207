use crate::error::{AppError, Result};

pub const DEFAULT_INDEX: &str = "stocks_real_time";

/// Connection identity for the search store, resolved once at startup.
/// Missing required values are a fatal error by design.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub index: String,
    pub username: String,
    pub password: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = require(&lookup, "ES_URL")?;
        let username = require(&lookup, "ES_USERNAME")?;
        let password = require(&lookup, "ES_PASSWORD")?;
        let index = lookup("ELASTIC_INDEX")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INDEX.to_string());

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            index,
            username,
            password,
        })
    }
}

fn require<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::message(format!(
            "{} must be set in the environment or .env",
            name
        ))),
    }
}
