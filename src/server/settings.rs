use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

use crate::server::cluster::labels::is_label_value;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    #[serde(default)]
    pub workload: WorkloadSettings,
    #[serde(default)]
    pub tenants: TenantSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Base64-encoded HS256 secret used to verify bearer tokens
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_platform_id() -> String {
    "hostplane".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_conflict_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct KubernetesSettings {
    /// Value of the `managed-by` labels on every object the platform owns
    #[serde(default = "default_platform_id")]
    pub platform_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            platform_id: default_platform_id(),
            request_timeout_secs: default_request_timeout_secs(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CpuMemory {
    pub cpu: String,
    pub memory: String,
}

impl CpuMemory {
    fn new(cpu: &str, memory: &str) -> Self {
        Self {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
        }
    }
}

fn default_requests() -> CpuMemory {
    CpuMemory::new("100m", "128Mi")
}

fn default_limits() -> CpuMemory {
    CpuMemory::new("500m", "512Mi")
}

/// Container resources applied when an application does not declare its own.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkloadSettings {
    #[serde(default = "default_requests")]
    pub default_requests: CpuMemory,
    #[serde(default = "default_limits")]
    pub default_limits: CpuMemory,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            default_requests: default_requests(),
            default_limits: default_limits(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QuotaSettings {
    pub requests_cpu: String,
    pub requests_memory: String,
    pub limits_cpu: String,
    pub limits_memory: String,
    pub pods: String,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            requests_cpu: "2".to_string(),
            requests_memory: "4Gi".to_string(),
            limits_cpu: "4".to_string(),
            limits_memory: "8Gi".to_string(),
            pods: "20".to_string(),
        }
    }
}

/// Per-container defaults of the tenant limit range.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LimitRangeSettings {
    #[serde(default = "default_requests")]
    pub default_request: CpuMemory,
    #[serde(default = "default_limits")]
    pub default_limit: CpuMemory,
}

impl Default for LimitRangeSettings {
    fn default() -> Self {
        Self {
            default_request: default_requests(),
            default_limit: default_limits(),
        }
    }
}

fn default_namespace_prefix() -> String {
    "tenant-".to_string()
}

fn default_provisioning_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenantSettings {
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
    #[serde(default)]
    pub quota: QuotaSettings,
    #[serde(default)]
    pub limits: LimitRangeSettings,
    #[serde(default = "default_provisioning_timeout_secs")]
    pub provisioning_timeout_secs: u64,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            namespace_prefix: default_namespace_prefix(),
            quota: QuotaSettings::default(),
            limits: LimitRangeSettings::default(),
            provisioning_timeout_secs: default_provisioning_timeout_secs(),
        }
    }
}

fn default_notification_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    /// Onboarding events are posted here as JSON; nothing is sent when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notification_timeout_secs(),
        }
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        lazy_static::lazy_static! {
            static ref ENV_REF: regex::Regex =
                regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
        }

        ENV_REF
            .replace_all(s, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match env::var(var_name) {
                    Ok(val) => val,
                    Err(_) => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns Ok(true) if a file was loaded, Ok(false) if no file found (when not required)
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
        required: bool,
    ) -> Result<bool, ConfigError> {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return Ok(true);
            }
        }

        if required {
            Err(ConfigError::Message(format!(
                "Required config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir, name
            )))
        } else {
            tracing::debug!(
                "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir,
                name
            );
            Ok(false)
        }
    }

    /// Load settings from `HOSTPLANE_CONFIG_DIR` (default `config`) for the run mode in
    /// `HOSTPLANE_CONFIG_RUN_MODE` (default `development`).
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("HOSTPLANE_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("HOSTPLANE_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load(&config_dir, &run_mode)
    }

    /// Load `default`, `<run_mode>` and `local` from `config_dir`, later files winning.
    pub fn load(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        Self::try_add_config_file(&mut builder, config_dir, "default", true)?;
        Self::try_add_config_file(&mut builder, config_dir, run_mode, false)?;
        Self::try_add_config_file(&mut builder, config_dir, "local", false)?;

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        // DATABASE_URL takes precedence over every config file
        if let Ok(database_url) = env::var("DATABASE_URL") {
            if !database_url.is_empty() {
                settings.database.url = database_url;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Message(
                "Database URL not configured. Set DATABASE_URL environment variable or [database] url in config".to_string()
            ));
        }

        if self.server.jwt_secret.is_empty() {
            return Err(ConfigError::Message(
                "JWT secret not configured. Set [server] jwt_secret in config. Generate with: openssl rand -base64 32".to_string()
            ));
        }

        if !is_label_value(&self.kubernetes.platform_id) {
            return Err(ConfigError::Message(format!(
                "kubernetes.platform_id '{}' is not a valid label value",
                self.kubernetes.platform_id
            )));
        }

        for (field, value) in [
            (
                "kubernetes.request_timeout_secs",
                self.kubernetes.request_timeout_secs,
            ),
            (
                "tenants.provisioning_timeout_secs",
                self.tenants.provisioning_timeout_secs,
            ),
            ("notifications.timeout_secs", self.notifications.timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be non-zero", field)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
server:
  host: "0.0.0.0"
  port: 3000
  jwt_secret: "dGhpcy1pcy1hLXRlc3Qtc2VjcmV0LW9mLWF0LWxlYXN0LTMyLWJ5dGVz"

database:
  url: "postgres://test@localhost/test"
"#;

    fn write_config(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("HOSTPLANE_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${HOSTPLANE_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("HOSTPLANE_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("HOSTPLANE_MISSING_VAR");
        let result =
            Settings::substitute_env_vars_in_string("${HOSTPLANE_MISSING_VAR:-default_value}");
        assert_eq!(result, "default_value");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("plain_value");
        assert_eq!(result, "plain_value");
    }

    #[test]
    fn test_defaults_for_optional_sections() {
        let temp_dir = TempDir::new().unwrap();
        write_config(&temp_dir, "default.yaml", MINIMAL);

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "test").unwrap();

        assert_eq!(settings.kubernetes.platform_id, "hostplane");
        assert_eq!(settings.kubernetes.request_timeout_secs, 10);
        assert_eq!(settings.kubernetes.conflict_retries, 3);
        assert_eq!(settings.tenants.namespace_prefix, "tenant-");
        assert_eq!(settings.workload.default_requests.cpu, "100m");
        assert_eq!(settings.workload.default_limits.memory, "512Mi");
        assert!(settings.notifications.webhook_url.is_none());
    }

    #[test]
    fn test_run_mode_file_overrides_default() {
        let temp_dir = TempDir::new().unwrap();
        write_config(&temp_dir, "default.yaml", MINIMAL);
        write_config(
            &temp_dir,
            "staging.toml",
            "[tenants]\nnamespace_prefix = \"org-\"\n\n[kubernetes]\nplatform_id = \"staging-plane\"\n",
        );

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "staging").unwrap();

        assert_eq!(settings.tenants.namespace_prefix, "org-");
        assert_eq!(settings.kubernetes.platform_id, "staging-plane");
    }

    #[test]
    fn test_unused_fields_warning() {
        // Unknown keys are only logged, loading still succeeds
        let temp_dir = TempDir::new().unwrap();
        write_config(
            &temp_dir,
            "default.yaml",
            &format!(
                "{}\nunknown_top_level: \"also unknown\"\nkubernetes:\n  bogus: 1\n",
                MINIMAL
            ),
        );

        let result = Settings::load(temp_dir.path().to_str().unwrap(), "production");
        assert!(
            result.is_ok(),
            "Config should load despite unknown fields: {:?}",
            result.err()
        );
    }

    #[test]
    fn test_missing_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = Settings::load(temp_dir.path().to_str().unwrap(), "development");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_platform_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write_config(&temp_dir, "default.yaml", MINIMAL);
        write_config(
            &temp_dir,
            "local.yaml",
            "kubernetes:\n  platform_id: \"not a label!\"\n",
        );

        let err = Settings::load(temp_dir.path().to_str().unwrap(), "development").unwrap_err();
        assert!(err.to_string().contains("platform_id"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write_config(&temp_dir, "default.yaml", MINIMAL);
        write_config(
            &temp_dir,
            "local.yaml",
            "kubernetes:\n  request_timeout_secs: 0\n",
        );

        let err = Settings::load(temp_dir.path().to_str().unwrap(), "development").unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }
}
