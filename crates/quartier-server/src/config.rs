use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub address_api: String,
    pub geo_api: String,
    pub iris_geojson: Option<PathBuf>,
    pub admin_email: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("QUARTIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("QUARTIER_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("QUARTIER_PORT") {
            Some(port) => port.parse().with_context(|| format!("invalid QUARTIER_PORT '{}'", port))?,
            None => 3000,
        };

        Ok(Self {
            host: get("QUARTIER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("QUARTIER_DB_PATH").unwrap_or_else(|| "quartier.db".into()).into(),
            jwt_secret,
            upload_dir: get("QUARTIER_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            address_api: get("QUARTIER_ADDRESS_API").unwrap_or_else(|| "https://api-adresse.data.gouv.fr".into()),
            geo_api: get("QUARTIER_GEO_API").unwrap_or_else(|| "https://geo.api.gouv.fr".into()),
            iris_geojson: get("QUARTIER_IRIS_GEOJSON").map(PathBuf::from),
            admin_email: get("QUARTIER_ADMIN_EMAIL").map(|email| email.to_lowercase()),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
