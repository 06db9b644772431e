use crate::config::RouterSettings;
use crate::domain::model::{Cluster, ClusterTopology, Scheme};
use crate::utils::error::{Result, RouterError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PROFILE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_REGISTRATION_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub port: u16,
    pub profile_api_url: String,
    pub registration_api_url: String,
    pub profile_timeout_seconds: Option<u64>,
    pub registration_timeout_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    pub scheme: Option<String>,
}

impl ClusterConfig {
    fn parsed_scheme(&self) -> Result<Scheme> {
        match self.scheme.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("http") => Ok(Scheme::Http),
            Some("https") => Ok(Scheme::Https),
            Some(other) => Err(RouterError::InvalidConfigValueError {
                field: format!("clusters.{}.scheme", self.name),
                value: other.to_string(),
                reason: "Valid schemes: http, https".to_string(),
            }),
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RouterError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| RouterError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${PROFILE_API_URL})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| RouterError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_positive_number("port", u64::from(self.port), 1)?;
        validation::validate_url("profile_api_url", &self.profile_api_url)?;
        validation::validate_url("registration_api_url", &self.registration_api_url)?;

        for (field, value) in [
            ("profile_timeout_seconds", self.profile_timeout_seconds),
            ("registration_timeout_seconds", self.registration_timeout_seconds),
            ("idle_timeout_seconds", self.idle_timeout_seconds),
        ] {
            if let Some(seconds) = value {
                validation::validate_positive_number(field, seconds, 1)?;
            }
        }

        if self.clusters.is_empty() {
            return Err(RouterError::MissingConfigError {
                field: "clusters".to_string(),
            });
        }
        validation::validate_unique("clusters.name", self.clusters.iter().map(|c| c.name.as_str()))?;

        for cluster in &self.clusters {
            validation::validate_non_empty_string("clusters.name", &cluster.name)?;
            let field = format!("clusters.{}.members", cluster.name);
            if cluster.members.is_empty() {
                return Err(RouterError::InvalidConfigValueError {
                    field,
                    value: "[]".to_string(),
                    reason: "Every cluster needs at least one member".to_string(),
                });
            }
            for member in &cluster.members {
                validation::validate_host_port(&field, member)?;
            }
            cluster.parsed_scheme()?;
        }

        Ok(())
    }

    /// Validates and freezes the file into the runtime settings.
    pub fn into_settings(self) -> Result<RouterSettings> {
        self.validate_config()?;

        let clusters = self
            .clusters
            .iter()
            .map(|c| {
                Ok(Cluster {
                    name: c.name.clone(),
                    members: c.members.clone(),
                    scheme: c.parsed_scheme()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RouterSettings {
            port: self.port,
            profile_api_url: self.profile_api_url,
            registration_api_url: self.registration_api_url,
            profile_timeout: Duration::from_secs(
                self.profile_timeout_seconds
                    .unwrap_or(DEFAULT_PROFILE_TIMEOUT_SECS),
            ),
            registration_timeout: Duration::from_secs(
                self.registration_timeout_seconds
                    .unwrap_or(DEFAULT_REGISTRATION_TIMEOUT_SECS),
            ),
            idle_timeout: Duration::from_secs(
                self.idle_timeout_seconds.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
            topology: Arc::new(ClusterTopology::new(clusters)?),
        })
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
