use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crjr_audit_core::RetryPolicy;
use crjr_audit_db::DbConfig;
use crjr_audit_http::HttpConfig;

/// An environment variable held a value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// How the final report is printed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Log output on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Everything a run needs, resolved before any rule executes.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub db: DbConfig,
    pub http: HttpConfig,
    pub retry: RetryPolicy,
    pub fail_fast: bool,
    /// JSON rules file; the built-in catalog is used when unset.
    pub rules_file: Option<PathBuf>,
    pub report_format: ReportFormat,
    pub log_format: LogFormat,
}

impl AuditConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `DATABASE_URL`           | unset                   |
    /// | `DB_HOST`                | `localhost`             |
    /// | `DB_PORT`                | `5432`                  |
    /// | `DB_NAME`                | `lifecycle_db`          |
    /// | `DB_USER`                | `postgres`              |
    /// | `DB_PASSWORD`            | `password`              |
    /// | `DB_SCHEMA`              | `public`                |
    /// | `DB_CONNECT_TIMEOUT_SECS`| `10`                    |
    /// | `API_BASE_URL`           | `http://localhost:3000` |
    /// | `HTTP_TIMEOUT_SECS`      | `10`                    |
    /// | `HTTP_RETRIES`           | `0`                     |
    /// | `HTTP_RETRY_DELAY_MS`    | `500`                   |
    /// | `AUDIT_FAIL_FAST`        | `false`                 |
    /// | `AUDIT_RULES_FILE`       | unset                   |
    /// | `AUDIT_REPORT_FORMAT`    | `text`                  |
    /// | `LOG_FORMAT`             | `pretty`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let db_defaults = DbConfig::default();
        let http_defaults = HttpConfig::default();
        let retry_defaults = RetryPolicy::default();

        let db = DbConfig {
            host: env.string("DB_HOST", &db_defaults.host),
            port: env.parse("DB_PORT", db_defaults.port, "a port number")?,
            database: env.string("DB_NAME", &db_defaults.database),
            user: env.string("DB_USER", &db_defaults.user),
            password: env.string("DB_PASSWORD", &db_defaults.password),
            schema: env.string("DB_SCHEMA", &db_defaults.schema),
            url: env.get("DATABASE_URL"),
            acquire_timeout: Duration::from_secs(env.parse(
                "DB_CONNECT_TIMEOUT_SECS",
                db_defaults.acquire_timeout.as_secs(),
                "a whole number of seconds",
            )?),
        };

        let http = HttpConfig {
            base_url: env.string("API_BASE_URL", &http_defaults.base_url),
            timeout: Duration::from_secs(env.parse(
                "HTTP_TIMEOUT_SECS",
                http_defaults.timeout.as_secs(),
                "a whole number of seconds",
            )?),
        };
        if http.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "HTTP_TIMEOUT_SECS",
                expected: "greater than zero",
                value: "0".to_string(),
            });
        }

        let retry = RetryPolicy {
            retries: env.parse("HTTP_RETRIES", retry_defaults.retries, "a non-negative integer")?,
            base_delay: Duration::from_millis(env.parse(
                "HTTP_RETRY_DELAY_MS",
                retry_defaults.base_delay.as_millis() as u64,
                "a whole number of milliseconds",
            )?),
        };

        Ok(Self {
            db,
            http,
            retry,
            fail_fast: env.flag("AUDIT_FAIL_FAST")?,
            rules_file: env.get("AUDIT_RULES_FILE").map(PathBuf::from),
            report_format: env.parse("AUDIT_REPORT_FORMAT", ReportFormat::default(), "text or json")?,
            log_format: env.parse("LOG_FORMAT", LogFormat::default(), "pretty or json")?,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and not blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(
        &self,
        key: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                key,
                expected,
                value,
            }),
        }
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                key,
                expected: "a boolean",
                value,
            }),
        }
    }
}
