use serde::Deserialize;
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub export_traces: bool,
}

/// Knobs for the notification rule HTTP surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ApiConfig {
    /// Upper bound on concurrent per-rule lookups while composing a list.
    pub list_concurrency: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            list_concurrency: 8,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Peer server used by [`crate::rules::RemoteRuleStore`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_timeout() -> u64 {
    10
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid APP_PORT override: {0}")]
    InvalidPort(std::num::ParseIntError),
    #[error("invalid [api] section: {0}")]
    InvalidApi(String),
}

impl Config {
    /// Load configuration from `path`, apply environment overrides, resolve
    /// `env:` markers and expand `~` in paths.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_env_markers()?;
        cfg.expand_paths();
        cfg.api.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = env::var("APP_PORT") {
            self.app.port = port.parse().map_err(ConfigError::InvalidPort)?;
        }

        if let Ok(otlp) = env::var("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(otlp);
        }

        if let (Ok(token), Some(remote)) = (env::var("REMOTE_TOKEN"), self.remote.as_mut()) {
            remote.token = token;
        }

        Ok(())
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.app.service_name)?;
        apply_env_marker(&mut self.app.env)?;
        apply_env_marker_path(&mut self.paths.database)?;
        if let Some(endpoint) = &mut self.telemetry.otlp_endpoint {
            apply_env_marker(endpoint)?;
        }
        if let Some(remote) = &mut self.remote {
            apply_env_marker(&mut remote.base_url)?;
            apply_env_marker(&mut remote.token)?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        let database_string = self.paths.database.to_string_lossy().to_string();
        let database = shellexpand::tilde(&database_string);
        self.paths.database = PathBuf::from(database.as_ref());
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.list_concurrency == 0 {
            return Err(ConfigError::InvalidApi(
                "list_concurrency must be at least 1".into(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidApi(format!(
                "default_page_size must be between 1 and max_page_size ({})",
                self.max_page_size
            )));
        }
        Ok(())
    }
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        let resolved = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
        *value = resolved;
    }
    Ok(())
}

fn apply_env_marker_path(path: &mut PathBuf) -> Result<(), ConfigError> {
    let mut value = path.to_string_lossy().to_string();
    apply_env_marker(&mut value)?;
    *path = PathBuf::from(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::{fs, sync::Mutex};
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const OVERRIDE_VARS: [&str; 3] = ["APP_PORT", "OTLP_ENDPOINT", "REMOTE_TOKEN"];

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    fn with_env(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock().expect("lock env");
        let mut all: Vec<(&str, Option<&str>)> = OVERRIDE_VARS
            .iter()
            .filter(|name| !vars.iter().any(|(k, _)| k == *name))
            .map(|name| (*name, None))
            .collect();
        all.extend_from_slice(vars);

        let saved: Vec<(String, Option<String>)> = all
            .iter()
            .map(|(k, _)| (k.to_string(), env::var(k).ok()))
            .collect();
        for (key, value) in &all {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        f();

        for (key, value) in saved {
            match value {
                Some(v) => unsafe { env::set_var(&key, v) },
                None => unsafe { env::remove_var(&key) },
            }
        }
    }

    const MINIMAL: &str = r#"
[app]
service_name = "alertrules"
port = 12000
env = "dev"

[paths]
database = "/tmp/rules.sqlite"

[telemetry]
export_traces = false
"#;

    #[test]
    fn minimal_config_uses_api_defaults() {
        let (_dir, path) = write_config(MINIMAL);
        with_env(&[], || {
            let cfg = Config::load(&path).expect("config loads");
            assert_eq!(cfg.app.port, 12000);
            assert_eq!(cfg.api.list_concurrency, 8);
            assert_eq!(cfg.api.default_page_size, 20);
            assert_eq!(cfg.api.max_page_size, 100);
            assert!(cfg.remote.is_none());
            assert!(cfg.telemetry.otlp_endpoint.is_none());
        });
    }

    #[test]
    fn resolves_env_markers_and_expands_tilde() {
        let (dir, path) = write_config(
            r#"
[app]
service_name = "alertrules"
port = 17900
env = "prod"

[paths]
database = "env:RULES_DB_PATH"

[telemetry]
otlp_endpoint = "http://localhost:4318"
export_traces = true

[api]
list_concurrency = 2
default_page_size = 5
max_page_size = 50

[remote]
base_url = "env:RULES_REMOTE_URL"
token = "env:RULES_REMOTE_TOKEN"
"#,
        );
        let home_dir = dir.path().join("home");
        fs::create_dir_all(&home_dir).expect("create home");
        let expected_db = home_dir.join("data/rules.db");

        with_env(
            &[
                ("HOME", Some(home_dir.to_str().expect("utf8 home"))),
                ("RULES_DB_PATH", Some("~/data/rules.db")),
                ("RULES_REMOTE_URL", Some("http://peer:8086")),
                ("RULES_REMOTE_TOKEN", Some("secret")),
            ],
            || {
                let cfg = Config::load(&path).expect("config loads");
                assert_eq!(cfg.paths.database, expected_db);
                assert_eq!(cfg.api.list_concurrency, 2);
                assert_eq!(cfg.api.default_page_size, 5);
                let remote = cfg.remote.expect("remote section");
                assert_eq!(remote.base_url, "http://peer:8086");
                assert_eq!(remote.token, "secret");
                assert_eq!(remote.timeout_secs, 10);
            },
        );
    }

    #[test]
    fn env_overrides_take_precedence() {
        let (_dir, path) = write_config(&format!(
            "{MINIMAL}\n[remote]\nbase_url = \"http://peer\"\ntoken = \"file-token\"\n"
        ));
        with_env(
            &[
                ("APP_PORT", Some("19000")),
                ("OTLP_ENDPOINT", Some("http://override.local:4318")),
                ("REMOTE_TOKEN", Some("env-token")),
            ],
            || {
                let cfg = Config::load(&path).expect("config loads");
                assert_eq!(cfg.app.port, 19000);
                assert_eq!(
                    cfg.telemetry.otlp_endpoint.as_deref(),
                    Some("http://override.local:4318")
                );
                assert_eq!(cfg.remote.expect("remote").token, "env-token");
            },
        );
    }

    #[test]
    fn env_marker_without_variable_errors() {
        let (_dir, path) = write_config(&MINIMAL.replace("\"dev\"", "\"env:NEEDS_ENV\""));
        with_env(&[("NEEDS_ENV", None)], || {
            match Config::load(&path).expect_err("missing env var should error") {
                ConfigError::MissingEnvVar(name) => assert_eq!(name, "NEEDS_ENV"),
                other => panic!("unexpected error: {other}"),
            }
        });
    }

    #[test]
    fn invalid_port_override_is_reported() {
        let (_dir, path) = write_config(MINIMAL);
        with_env(&[("APP_PORT", Some("not-a-number"))], || {
            let err = Config::load(&path).expect_err("invalid port should error");
            assert!(matches!(err, ConfigError::InvalidPort(_)));
        });
    }

    #[test]
    fn page_size_above_maximum_is_rejected() {
        let (_dir, path) = write_config(&format!(
            "{MINIMAL}\n[api]\ndefault_page_size = 500\nmax_page_size = 100\n"
        ));
        with_env(&[], || {
            let err = Config::load(&path).expect_err("bad api section");
            assert!(matches!(err, ConfigError::InvalidApi(_)));
        });
    }
}
