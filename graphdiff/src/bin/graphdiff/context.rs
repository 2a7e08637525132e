use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use graphdiff::Endpoint;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "graphdiff.toml";

const REQUIRED_FIELDS: &[&str] = &["uri", "user", "password"];
const INSECURE_PASSWORDS: &[&str] = &["password", "neo4j", "123456", "admin"];
const SUPPORTED_SCHEMES: &[&str] = &["bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc"];

pub static ENV_VAR_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid"));

pub const EXAMPLE_CONFIG: &str = r#"# graphdiff endpoint profiles
#
# Values may reference environment variables as ${NAME}.

[endpoints.local]
uri = "bolt://localhost:7687"
user = "neo4j"
password = "${LOCAL_NEO4J_PASSWORD}"
description = "Local development instance"

[endpoints.remote]
uri = "neo4j+s://graph.example.com:7687"
user = "neo4j"
password = "${REMOTE_NEO4J_PASSWORD}"
description = "Remote production instance"

[compare]
sample_size = 10
batch_size = 100
max_differences = 20

# Candidate key properties per label, tried in order.
[keys]
Paper = ["arxiv_id", "url_abs", "id", "title"]

# Fetch batch size per label.
[batch_overrides]
Paper = 10
"#;

/// Configuration stored in graphdiff.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphdiffConfig {
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointProfile>,
    #[serde(default)]
    pub compare: CompareSettings,
    #[serde(default)]
    pub keys: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub batch_overrides: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointProfile {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EndpointProfile {
    fn field(&self, name: &str) -> &str {
        match name {
            "uri" => &self.uri,
            "user" => &self.user,
            "password" => &self.password,
            _ => "",
        }
    }
}

/// Defaults for `compare`, overridden by command-line flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareSettings {
    pub sample_size: Option<NonZeroUsize>,
    pub batch_size: Option<NonZeroUsize>,
    pub max_differences: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub scoped: Option<bool>,
}

/// Loaded configuration file, if any
pub struct ConfigContext {
    pub config_path: PathBuf,
    pub config: Option<GraphdiffConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub environment: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, environment: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            environment: environment.to_string(),
            message: message.into(),
        });
    }

    fn warning(&mut self, environment: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            environment: environment.to_string(),
            message: message.into(),
        });
    }
}

impl ConfigContext {
    /// Load the config file at `path`; a missing file is not an error
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content =
                std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let config: GraphdiffConfig =
                toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
            Some(config)
        } else {
            None
        };

        Ok(Self {
            config_path: path.to_path_buf(),
            config,
        })
    }

    pub fn exists(&self) -> bool {
        self.config.is_some()
    }

    pub fn settings(&self) -> CompareSettings {
        self.config.as_ref().map(|c| c.compare.clone()).unwrap_or_default()
    }

    pub fn environments(&self) -> Vec<(&str, &EndpointProfile)> {
        self.config
            .as_ref()
            .map(|c| c.endpoints.iter().map(|(name, profile)| (name.as_str(), profile)).collect())
            .unwrap_or_default()
    }

    pub fn profile(&self, name: &str) -> Result<&EndpointProfile> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("No config file found at {}", self.config_path.display()))?;

        config.endpoints.get(name).ok_or_else(|| {
            let available: Vec<&str> = config.endpoints.keys().map(String::as_str).collect();
            anyhow!(
                "Environment '{name}' not found in {}. Available: {}",
                self.config_path.display(),
                available.join(", ")
            )
        })
    }

    /// Resolve a profile into a connectable endpoint, expanding `${VAR}` references
    pub fn endpoint(&self, name: &str) -> Result<Endpoint> {
        let profile = self.profile(name)?;

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| profile.field(field).is_empty())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("Environment '{name}' is missing: {}", missing.join(", "));
        }

        Ok(Endpoint::new(
            expand_env_vars(&profile.uri).with_context(|| format!("Environment '{name}' uri"))?,
            expand_env_vars(&profile.user).with_context(|| format!("Environment '{name}' user"))?,
            expand_env_vars(&profile.password).with_context(|| format!("Environment '{name}' password"))?,
        ))
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Some(config) = &self.config else {
            report.error("-", format!("No config file found at {}", self.config_path.display()));
            return report;
        };

        if config.endpoints.is_empty() {
            report.error("-", "No endpoints defined");
        }

        for (name, profile) in &config.endpoints {
            for field in REQUIRED_FIELDS {
                if profile.field(field).is_empty() {
                    report.error(name, format!("Missing required field: {field}"));
                }
            }

            if !profile.uri.is_empty() {
                match expand_env_vars(&profile.uri) {
                    Ok(uri) => match Url::parse(&uri) {
                        Ok(parsed) if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) => report.warning(
                            name,
                            format!(
                                "URI scheme '{}' is not one of {}",
                                parsed.scheme(),
                                SUPPORTED_SCHEMES.join(", ")
                            ),
                        ),
                        Ok(_) => {}
                        Err(err) => report.error(name, format!("Invalid URI '{uri}': {err}")),
                    },
                    Err(err) => report.warning(name, err.to_string()),
                }
            }

            if !profile.password.is_empty() {
                match expand_env_vars(&profile.password) {
                    Ok(password) if INSECURE_PASSWORDS.contains(&password.as_str()) => {
                        report.warning(name, "Using a default/insecure password")
                    }
                    Ok(_) => {}
                    Err(err) => report.warning(name, err.to_string()),
                }
            }
        }

        report
    }
}

/// Replace every `${NAME}` with the value of the environment variable NAME
pub fn expand_env_vars(value: &str) -> Result<String> {
    let mut unset = Vec::new();
    let expanded = ENV_VAR_REFERENCE.replace_all(value, |caps: &Captures| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            unset.push(name.to_string());
            String::new()
        })
    });

    if !unset.is_empty() {
        anyhow::bail!("Environment variable(s) not set: {}", unset.join(", "));
    }
    Ok(expanded.into_owned())
}

/// Write the example config; refuses to overwrite unless `force`
pub fn write_example_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, EXAMPLE_CONFIG).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_zero_sample_size_is_rejected() {
        assert!(toml::from_str::<GraphdiffConfig>("[compare]\nsample_size = 0\n").is_err());
        assert!(toml::from_str::<GraphdiffConfig>("[compare]\nbatch_size = 0\n").is_err());
        assert!(toml::from_str::<GraphdiffConfig>("[compare]\nsample_size = 1\n").is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let config: GraphdiffConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.compare.sample_size.map(NonZeroUsize::get), Some(10));
        assert_eq!(config.keys["Paper"][0], "arxiv_id");
        assert_eq!(config.batch_overrides["Paper"], 10);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = ConfigContext::load(&dir.path().join("absent.toml")).unwrap();
        assert!(!ctx.exists());
        assert!(!ctx.validate().is_valid());
    }

    #[test]
    #[serial]
    fn test_endpoint_expands_env_vars() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[endpoints.staging]
uri = "bolt://${GRAPHDIFF_TEST_HOST}:7687"
user = "neo4j"
password = "${GRAPHDIFF_TEST_PASSWORD}"
"#,
        );
        unsafe {
            std::env::set_var("GRAPHDIFF_TEST_HOST", "staging.internal");
            std::env::set_var("GRAPHDIFF_TEST_PASSWORD", "hunter2");
        }

        let ctx = ConfigContext::load(&path).unwrap();
        let endpoint = ctx.endpoint("staging").unwrap();
        assert_eq!(endpoint.uri, "bolt://staging.internal:7687");
        assert_eq!(endpoint.password, "hunter2");

        unsafe {
            std::env::remove_var("GRAPHDIFF_TEST_PASSWORD");
        }
        let err = ctx.endpoint("staging").unwrap_err();
        assert!(format!("{err:#}").contains("GRAPHDIFF_TEST_PASSWORD"));

        unsafe {
            std::env::remove_var("GRAPHDIFF_TEST_HOST");
        }
    }

    #[test]
    fn test_unknown_environment_lists_available() {
        let dir = TempDir::new().unwrap();
        let ctx = ConfigContext::load(&write_config(&dir, EXAMPLE_CONFIG)).unwrap();
        let err = ctx.endpoint("qa").unwrap_err().to_string();
        assert!(err.contains("local"));
        assert!(err.contains("remote"));
    }

    #[test]
    fn test_validation_reports_errors_and_warnings() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[endpoints.broken]
uri = "not a uri"
user = "neo4j"

[endpoints.weak]
uri = "http://localhost:7474"
user = "neo4j"
password = "neo4j"
"#,
        );

        let report = ConfigContext::load(&path).unwrap().validate();
        assert!(!report.is_valid());
        assert!(
            report
                .errors
                .iter()
                .any(|issue| issue.environment == "broken" && issue.message.contains("password"))
        );
        assert!(
            report
                .errors
                .iter()
                .any(|issue| issue.environment == "broken" && issue.message.contains("Invalid URI"))
        );
        assert!(
            report
                .warnings
                .iter()
                .any(|issue| issue.environment == "weak" && issue.message.contains("insecure"))
        );
        assert!(
            report
                .warnings
                .iter()
                .any(|issue| issue.environment == "weak" && issue.message.contains("http"))
        );
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        write_example_config(&path, false).unwrap();
        assert!(write_example_config(&path, false).is_err());
        assert!(write_example_config(&path, true).is_ok());
    }
}
