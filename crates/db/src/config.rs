use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

/// Database connection settings.
///
/// Defaults match a local development database. `url`, when set, replaces
/// the discrete host/port/credential fields.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Schema used for unqualified table names and metadata lookups.
    pub schema: String,
    /// Full `postgres://` URL (`DATABASE_URL`).
    pub url: Option<String>,
    /// How long a query waits for a connection before giving up.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "lifecycle_db".to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            schema: "public".to_string(),
            url: None,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl DbConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let options = match &self.url {
            Some(url) => url.parse::<PgConnectOptions>()?,
            None => PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .database(&self.database)
                .username(&self.user)
                .password(&self.password),
        };
        Ok(options
            .application_name("crjr-audit")
            .options([("search_path", self.schema.as_str())]))
    }

    /// Connection target without credentials, for logging.
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(url) => redact_url(url),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<invalid url>".to_string();
    };
    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}
