use log::{error, info, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio::time::sleep;
use tokio_postgres::{Config, NoTls};
use url::Url;

use crate::config::DatabaseSettings;
use crate::error::DbError;

/// Open connection to the telemetry database
pub struct Database {
    pub(crate) client: tokio_postgres::Client,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("closed", &self.client.is_closed())
            .finish_non_exhaustive()
    }
}

pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, DbError> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|e| DbError::Tls(format!("SSL builder error: {}", e)))?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| DbError::Tls(format!("Error loading CA cert: {}", e)))?;

    // The database ships a self-signed certificate
    builder.set_verify(SslVerifyMode::NONE);

    Ok(MakeTlsConnector::new(builder.build()))
}

/// Connection parameters plus the CA file to use for TLS, if any
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub config: Config,
    pub sslrootcert: Option<String>,
}

impl ConnectionTarget {
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, DbError> {
        match &settings.url {
            Some(url) => Self::from_url(url),
            None => {
                let mut config = Config::new();
                config
                    .host(&settings.host)
                    .dbname(&settings.name)
                    .user(&settings.role)
                    .password(&settings.password);
                if let Some(port) = settings.port {
                    config.port(port);
                }
                Ok(ConnectionTarget {
                    config,
                    sslrootcert: None,
                })
            }
        }
    }

    /// Parse a postgres:// URL. An `sslrootcert` query parameter is pulled
    /// out of the URL and turns on TLS.
    pub fn from_url(database_url: &str) -> Result<Self, DbError> {
        let url = Url::parse(database_url)
            .map_err(|e| DbError::Settings(format!("URL parse error: {}", e)))?;

        let mut sslrootcert = None;
        let mut clean_params = Vec::new();
        for (key, value) in url.query_pairs() {
            if key == "sslrootcert" {
                sslrootcert = Some(value.to_string());
            } else {
                clean_params.push((key.into_owned(), value.into_owned()));
            }
        }

        let mut clean_url = url.clone();
        clean_url.set_query(None);
        if !clean_params.is_empty() {
            let query = clean_params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            clean_url.set_query(Some(&query));
        }

        let config = clean_url
            .as_str()
            .parse::<Config>()
            .map_err(|e| DbError::Settings(e.to_string()))?;

        Ok(ConnectionTarget {
            config,
            sslrootcert,
        })
    }

    async fn connect(&self) -> Result<tokio_postgres::Client, ConnectFailure> {
        match &self.sslrootcert {
            Some(path) => {
                let connector = create_ssl_connector(path).map_err(ConnectFailure::Fatal)?;
                let (client, connection) = self
                    .config
                    .connect(connector)
                    .await
                    .map_err(ConnectFailure::Retry)?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("Connection error: {}", e);
                    }
                });
                Ok(client)
            }
            None => {
                let (client, connection) = self
                    .config
                    .connect(NoTls)
                    .await
                    .map_err(ConnectFailure::Retry)?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("Connection error: {}", e);
                    }
                });
                Ok(client)
            }
        }
    }
}

enum ConnectFailure {
    /// Configuration problem; retrying will not help
    Fatal(DbError),
    Retry(tokio_postgres::Error),
}

impl Database {
    /// Connect, retrying `connection_attempts` times with a logged countdown
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DbError> {
        let target = ConnectionTarget::from_settings(settings)?;
        let attempts = settings.connection_attempts.max(1);

        let mut attempt = 1;
        loop {
            match target.connect().await {
                Ok(client) => {
                    info!("Connected to database on attempt {}", attempt);
                    return Ok(Database { client });
                }
                Err(ConnectFailure::Fatal(e)) => return Err(e),
                Err(ConnectFailure::Retry(e)) => {
                    let remaining = attempts - attempt;
                    if remaining == 0 {
                        error!(
                            "Database connection failed. Continuing with limited functionality."
                        );
                        return Err(DbError::Connect {
                            attempts,
                            source: e,
                        });
                    }
                    warn!("Connection failed, {} attempts left. Error: {}", remaining, e);
                    sleep(settings.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            name: "telemetry".into(),
            role: "teleuser".into(),
            password: "teleuser".into(),
            host: "/tmp".into(),
            port: Some(5433),
            connection_attempts: 2,
            retry_delay: Duration::from_millis(10),
            url: None,
        }
    }

    #[test]
    fn test_target_from_settings() {
        let target = ConnectionTarget::from_settings(&settings()).unwrap();
        assert_eq!(target.config.get_dbname(), Some("telemetry"));
        assert_eq!(target.config.get_user(), Some("teleuser"));
        assert_eq!(target.config.get_ports(), &[5433]);
        assert!(target.sslrootcert.is_none());
    }

    #[test]
    fn test_url_overrides_settings_and_extracts_sslrootcert() {
        let mut settings = settings();
        settings.url = Some(
            "postgres://etl:pw@db.example.com:5432/readings?sslrootcert=/etc/ca.pem&application_name=dash"
                .into(),
        );

        let target = ConnectionTarget::from_settings(&settings).unwrap();
        assert_eq!(target.sslrootcert.as_deref(), Some("/etc/ca.pem"));
        assert_eq!(target.config.get_dbname(), Some("readings"));
        assert_eq!(target.config.get_user(), Some("etl"));
        assert_eq!(target.config.get_application_name(), Some("dash"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ConnectionTarget::from_url("not a url"),
            Err(DbError::Settings(_))
        ));
    }

    #[test]
    fn test_missing_ca_file() {
        assert!(matches!(
            create_ssl_connector("/nonexistent/ca.pem"),
            Err(DbError::Tls(_))
        ));
    }
}
