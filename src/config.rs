//! Configuration manager for hiregate.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of this API.
    pub url: String,
    /// Employee-facing application, used to build invitation links.
    pub frontend_url: String,
    /// Path of the registration page on `frontend_url`.
    pub registration_path: String,
    pub port: u16,
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to session JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to mail event publishing.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to uploaded files.
    #[serde(skip_serializing)]
    pub storage: Option<Storage>,
    #[serde(skip_serializing)]
    pub registration: Registration,
    #[serde(skip_serializing)]
    pub telemetry: Option<Telemetry>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "hiregate".to_owned(),
            url: "http://localhost:8080/".to_owned(),
            frontend_url: "http://localhost:5173".to_owned(),
            registration_path: "/register".to_owned(),
            port: 8080,
            version: VERSION.to_owned(),
            path: PathBuf::new(),
            token: None,
            postgres: None,
            argon2: None,
            mail: None,
            storage: None,
            registration: Registration::default(),
            telemetry: None,
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// RabbitMQ configuration for the mailing queue.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// amqp://hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
}

/// Json Web Token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// HMAC secret used to sign sessions.
    pub secret: String,
    /// Update token audience.
    /// Default is `hiregate`.
    pub audience: Option<String>,
}

/// Local object storage.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Storage {
    /// Directory holding uploaded files.
    pub root: PathBuf,
    /// Secret signing preview links.
    pub secret: String,
    /// Base URL of signed links. Defaults to `url`.
    pub public_url: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Registration {
    /// Lifetime of an invitation.
    pub token_ttl_hours: i64,
}

impl Default for Registration {
    fn default() -> Self {
        Self { token_ttl_hours: 3 }
    }
}

#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    /// OTLP gRPC collector, e.g. `http://localhost:4317`.
    pub otlp_endpoint: Option<String>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Registration page of the employee-facing application.
    pub fn registration_url(&self) -> String {
        format!(
            "{}{}",
            self.frontend_url.trim_end_matches('/'),
            self.registration_path
        )
    }

    /// Link an invited person follows to register.
    pub fn invitation_link(&self, token: &str) -> String {
        format!("{}?token={}", self.registration_url(), token)
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration = match serde_yaml::from_reader(file) {
                    Ok(config) => config,
                    Err(err) => {
                        return Ok(Arc::new(self.error(err)));
                    },
                };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;
                config.frontend_url = self.normalize_url(&config.frontend_url)?;
                if let Some(storage) = config.storage.as_mut() {
                    storage.public_url = storage
                        .public_url
                        .as_deref()
                        .map(|u| self.normalize_url(u))
                        .transpose()?;
                }

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "name: acme\nurl: api.acme.com\nfrontend_url: https://hr.acme.com/\nregistration:\n  token_ttl_hours: 5\n",
        )
        .unwrap();

        let config = Configuration::default().path(path).read().unwrap();
        assert_eq!(config.name, "acme");
        assert_eq!(config.url, "https://api.acme.com/");
        assert_eq!(config.registration.token_ttl_hours, 5);
        assert_eq!(config.registration_path, "/register");
        assert_eq!(
            config.invitation_link("abc"),
            "https://hr.acme.com/register?token=abc"
        );
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/config.yaml"))
            .read()
            .unwrap();
        assert_eq!(config.registration.token_ttl_hours, 3);
        assert!(config.postgres.is_none());
    }
}
