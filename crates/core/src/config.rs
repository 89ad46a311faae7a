use serde::{Deserialize, Serialize};

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    /// Base URL used in generated links (presigned URLs, public routes).
    /// Defaults to `http://{host}:{port}` when unset.
    pub public_domain: Option<String>,

    /// CORS allowed origin. `*` permits any origin.
    pub cors_origin: String,

    // Credentials
    /// Key that may create the first principal. Without it the gateway can
    /// never be bootstrapped.
    pub bootstrap_api_key: Option<String>,
    /// Hex-encoded 32-byte key for presigned-URL MACs. Auto-generated and
    /// persisted through the KV adapter when unset.
    pub signing_secret: Option<String>,

    // Debug & logging
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    // Request body size limit for JSON routes (MB)
    pub body_limit_mb: usize,
    // Upper bound for blob upload bodies (MB)
    pub max_blob_mb: usize,

    pub presign: PresignConfig,
    pub token: TokenConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PresignConfig {
    /// When false, presign routes return 503 and downloads are
    /// gateway-mediated.
    pub enabled: bool,
    /// Presigned URL lifetime in seconds.
    pub expires_in: u64,
    /// Extended lifetime allowed for public-visibility redirects.
    pub public_expires_in: u64,
}

impl Default for PresignConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expires_in: 3600,
            public_expires_in: 604_800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TokenConfig {
    /// Default capability-token lifetime in seconds (7 days).
    pub default_ttl: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_ttl: 604_800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// In-process storage, lost on restart. Intended for tests and demos.
    Memory,
    /// Filesystem-backed storage under `data_dir`.
    Local,
    /// Remote edge KV/object backend.
    Edge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// Root directory for `local` mode.
    pub data_dir: String,
    pub edge: EdgeConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Memory,
            data_dir: "./data".to_string(),
            edge: EdgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EdgeConfig {
    /// Base URL of the edge storage service.
    pub endpoint: Option<String>,
    /// Bearer token for the edge storage service.
    pub token: Option<String>,
    /// Bucket label embedded in presign claims.
    pub bucket: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8410,
            public_domain: None,
            cors_origin: "*".to_string(),
            bootstrap_api_key: None,
            signing_secret: None,
            logging_to_file: false,
            log_dir: None,
            body_limit_mb: 100,
            max_blob_mb: 200,
            presign: PresignConfig::default(),
            token: TokenConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml_ng::from_str(&contents)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(ref secret) = self.signing_secret {
            anyhow::ensure!(
                secret.len() == 64 && secret.bytes().all(|b| b.is_ascii_hexdigit()),
                "signing-secret must be 64 hex characters"
            );
        }
        if let Some(ref key) = self.bootstrap_api_key {
            anyhow::ensure!(!key.is_empty(), "bootstrap-api-key must not be empty");
        }
        anyhow::ensure!(self.presign.expires_in > 0, "presign expires-in must be positive");
        anyhow::ensure!(self.token.default_ttl > 0, "token default-ttl must be positive");
        if self.storage.mode == StorageMode::Edge {
            anyhow::ensure!(
                self.storage.edge.endpoint.is_some(),
                "edge storage requires an endpoint"
            );
            anyhow::ensure!(
                self.storage.edge.token.is_some(),
                "edge storage requires a token"
            );
        }
        Ok(())
    }

    /// Sanitize and normalize configuration.
    fn sanitize(&mut self) {
        if let Some(ref mut domain) = self.public_domain {
            while domain.ends_with('/') {
                domain.pop();
            }
        }
        if self.storage.edge.bucket.is_empty() {
            self.storage.edge.bucket = "stratum".to_string();
        }
    }

    /// Base URL for generated links.
    pub fn public_base(&self) -> String {
        match self.public_domain {
            Some(ref domain) => domain.clone(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// Decoded signing secret, when configured.
    pub fn signing_secret_bytes(&self) -> Option<Vec<u8>> {
        self.signing_secret.as_ref().and_then(|s| hex::decode(s).ok())
    }
}
