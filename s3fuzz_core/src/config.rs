use crate::headers::Kind;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
}

pub fn default_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_bucket() -> String {
    "s3fuzz".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl TargetConfig {
    /// The path-style URL of the configured bucket or object.
    pub fn url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        match &self.object {
            Some(object) => {
                format!("{endpoint}/{}/{}", self.bucket, object.trim_start_matches('/'))
            }
            None => format!("{endpoint}/{}", self.bucket),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            bucket: default_bucket(),
            object: None,
            method: default_method(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureVersion {
    V2,
    #[default]
    V4,
}

#[derive(Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub signature: SignatureVersion,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key", &self.access_key)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    /// Seed of the random generator; time based when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Header kinds to insert one random header of, per request.
    #[serde(default = "default_insert_kinds")]
    pub insert_kinds: Vec<Kind>,
    /// Headers whose name starts with one of these (case-insensitive) are removed.
    #[serde(default)]
    pub drop_prefixes: Vec<String>,
    #[serde(default)]
    pub log_requests: bool,
}

pub fn default_iterations() -> u64 {
    100
}

fn default_insert_kinds() -> Vec<Kind> {
    Kind::ALL.to_vec()
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            seed: None,
            iterations: default_iterations(),
            insert_kinds: default_insert_kinds(),
            drop_prefixes: Vec::new(),
            log_requests: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
}

impl HarnessConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self, anyhow::Error> {
        let config: HarnessConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        http::Method::from_bytes(config.target.method.as_bytes())
            .map_err(|_| anyhow::anyhow!("Invalid HTTP method {:?}", config.target.method))?;
        Ok(config)
    }
}
