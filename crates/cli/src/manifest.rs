use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use storefront_core::config::{AuthConfig, CheckoutConfig, StorefrontConfig};
use url::Url;

/// Storefront manifest file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub server: ServerConfig,

    /// Payment processor the handlers talk to
    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub checkout: CheckoutConfig,

    /// Where reported errors go
    #[serde(default)]
    pub reporting: ReportingConfig,

    #[serde(default)]
    pub auth: AuthManifest,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadManifestError {
    #[error("{} not found at {}. Please create a {} file in your project root.",
        storefront_types::MANIFEST_FILE_NAME,
        .0.display(),
        storefront_types::MANIFEST_FILE_NAME)]
    FileNotFound(std::path::PathBuf),
    #[error("Failed to read {}: {}", .0.display(), .1)]
    ReadError(std::path::PathBuf, std::io::Error),
    #[error("Failed to parse {}: {}", .0.display(), .1)]
    ParseError(std::path::PathBuf, serde_yml::Error),
}

impl Manifest {
    /// Load manifest from the specified file path
    pub fn load(manifest_file_path: &Path) -> Result<Self, LoadManifestError> {
        if !manifest_file_path.exists() {
            return Err(LoadManifestError::FileNotFound(
                manifest_file_path.to_path_buf(),
            ));
        }

        let content = fs::read_to_string(manifest_file_path)
            .map_err(|e| LoadManifestError::ReadError(manifest_file_path.to_path_buf(), e))?;

        let manifest: Manifest = serde_yml::from_str(&content)
            .map_err(|e| LoadManifestError::ParseError(manifest_file_path.to_path_buf(), e))?;

        Ok(manifest)
    }

    /// Runtime settings, with secrets resolved from the environment
    pub fn storefront_config(&self, token_secret: String) -> StorefrontConfig {
        StorefrontConfig {
            checkout: self.checkout.clone(),
            auth: AuthConfig {
                token_secret,
                token_ttl_hours: self.auth.token_ttl_hours,
                issuer: self.auth.issuer.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8488
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Payment processor selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProcessorConfig {
    Stripe {
        /// Environment variable holding the secret key
        #[serde(default = "default_stripe_secret_env")]
        secret_key_env: String,
        /// Override of the API base, e.g. a local mock
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<Url>,
    },
    Sandbox,
}

fn default_stripe_secret_env() -> String {
    "STRIPE_SECRET_KEY".to_string()
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig::Stripe {
            secret_key_env: default_stripe_secret_env(),
            base_url: None,
        }
    }
}

/// Error reporting destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sink", rename_all = "snake_case")]
pub enum ReportingConfig {
    /// Structured log lines only
    #[default]
    Log,
    CloudLogging {
        project_id: String,
        /// Environment variable holding an OAuth access token
        #[serde(default = "default_access_token_env")]
        access_token_env: String,
    },
}

fn default_access_token_env() -> String {
    "GOOGLE_CLOUD_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthManifest {
    /// Environment variable holding the session signing secret
    #[serde(default = "default_token_secret_env")]
    pub token_secret_env: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
}

fn default_token_secret_env() -> String {
    "STOREFRONT_TOKEN_SECRET".to_string()
}

fn default_token_ttl_hours() -> u64 {
    AuthConfig::default().token_ttl_hours
}

fn default_issuer() -> String {
    AuthConfig::default().issuer
}

impl Default for AuthManifest {
    fn default() -> Self {
        Self {
            token_secret_env: default_token_secret_env(),
            token_ttl_hours: default_token_ttl_hours(),
            issuer: default_issuer(),
        }
    }
}
