use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret-key-change-in-production-minimum-32-chars";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtSettings,
    pub person_service: PersonServiceConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

/// Base URL of the person directory used for ticket enrichment. Left unset,
/// enrichment is skipped entirely.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersonServiceConfig {
    pub base_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://desk:@localhost:5432/deskserver".to_string(),
            },
            jwt: JwtSettings::default(),
            person_service: PersonServiceConfig::default(),
        }
    }
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: DEV_JWT_SECRET.to_string(),
            issuer: "deskserver".to_string(),
            access_ttl_seconds: 3600,
            refresh_ttl_seconds: 604_800,
        }
    }
}

impl AppConfig {
    /// Layered load: built-in defaults, then `deskserver.toml`, then
    /// `DESKSERVER_*` variables (`DESKSERVER_SERVER__PORT=9090`), with the
    /// conventional `DATABASE_URL` / `JWT_SECRET` variables taking final
    /// precedence.
    pub fn load() -> Result<Self, figment::Error> {
        let mut config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("deskserver.toml"))
            .merge(Env::prefixed("DESKSERVER_").split("__"))
            .extract()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.jwt.secret = secret;
        }
        if config.jwt.secret == DEV_JWT_SECRET {
            warn!("JWT_SECRET not set, using default development secret - DO NOT USE IN PRODUCTION");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jwt.issuer, "deskserver");
        assert!(config.jwt.access_ttl_seconds < config.jwt.refresh_ttl_seconds);
        assert!(config.person_service.base_url.is_none());
    }
}
