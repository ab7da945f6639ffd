use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub retention_interval_secs: u64,
    pub token_ttl_hours: i64,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("SYNERGY_JWT_SECRET").unwrap_or_default();
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("SYNERGY_JWT_SECRET must be set to a real secret");
        }

        let db_path = PathBuf::from(lookup("SYNERGY_DB_PATH").unwrap_or_else(|| "synergypark.db".into()));
        let host = lookup("SYNERGY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "SYNERGY_PORT", 3000u16)?;
        let retention_interval_secs = parse_or(&lookup, "SYNERGY_RETENTION_INTERVAL_SECS", 3600u64)?;
        let token_ttl_hours = parse_or(&lookup, "SYNERGY_TOKEN_TTL_HOURS", 24i64)?;

        if retention_interval_secs == 0 {
            bail!("SYNERGY_RETENTION_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            retention_interval_secs,
            token_ttl_hours,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("SYNERGY_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, PathBuf::from("synergypark.db"));
        assert_eq!(cfg.retention_interval_secs, 3600);
        assert_eq!(cfg.token_ttl_hours, 24);
        assert_eq!(cfg.addr().unwrap().port(), 3000);
    }

    #[test]
    fn placeholder_secret_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("SYNERGY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_refused() {
        let err = config(&[("SYNERGY_JWT_SECRET", "s3cr3t!"), ("SYNERGY_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("SYNERGY_PORT"));
        assert!(config(&[("SYNERGY_JWT_SECRET", "s3cr3t!"), ("SYNERGY_RETENTION_INTERVAL_SECS", "0")]).is_err());
    }

    #[test]
    fn overrides_win() {
        let cfg = config(&[
            ("SYNERGY_JWT_SECRET", "s3cr3t!"),
            ("SYNERGY_HOST", "127.0.0.1"),
            ("SYNERGY_PORT", "8080"),
            ("SYNERGY_DB_PATH", "/tmp/x.db"),
        ])
        .unwrap();
        assert_eq!(cfg.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
    }
}
