use std::sync::Arc;

use console::{StyledObject, style};
use storefront_core::{
    Storefront,
    processor::{PaymentProcessor, SandboxProcessor, StripeProcessor},
    reporting::{CloudLoggingSink, ErrorSink, TracingSink},
};
use tracing_subscriber::EnvFilter;

use crate::{
    Context,
    manifest::{Manifest, ProcessorConfig, ReportingConfig},
};

/// Signing secret used when a sandbox run has none configured
const SANDBOX_TOKEN_SECRET: &str = "storefront-sandbox-secret";

#[derive(Debug, thiserror::Error)]
pub enum RunCommandError {
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
    #[error("Failed to start storefront server: {0}")]
    ServerStart(std::io::Error),
}

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct RunCommand {
    /// Port to run the server on (overrides the manifest)
    #[arg(long)]
    pub port: Option<u16>,

    /// Host to bind (overrides the manifest)
    #[arg(long)]
    pub host: Option<String>,

    /// Use the in-memory sandbox processor regardless of the manifest
    #[arg(long)]
    pub sandbox: bool,
}

fn get() -> StyledObject<&'static str> {
    style("   GET").yellow()
}

fn post() -> StyledObject<&'static str> {
    style("  POST").magenta()
}

/// Resolve a secret through `lookup`, failing with the variable name
fn secret(
    name: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<String, RunCommandError> {
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RunCommandError::MissingEnv(name.to_string()))
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl RunCommand {
    fn uses_sandbox(&self, manifest: &Manifest) -> bool {
        self.sandbox || manifest.processor == ProcessorConfig::Sandbox
    }

    pub fn processor(
        &self,
        manifest: &Manifest,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<Arc<dyn PaymentProcessor>, RunCommandError> {
        if self.uses_sandbox(manifest) {
            return Ok(Arc::new(SandboxProcessor::new()));
        }

        match &manifest.processor {
            ProcessorConfig::Stripe {
                secret_key_env,
                base_url,
            } => {
                let secret_key = secret(secret_key_env, lookup)?;
                let processor = match base_url {
                    Some(url) => {
                        StripeProcessor::with_base_url(url.as_str(), secret_key)
                    }
                    None => StripeProcessor::new(secret_key),
                };
                if !processor.is_test_mode() {
                    eprintln!(
                        "{} Using a live Stripe key",
                        style("Warning:").yellow()
                    );
                }
                Ok(Arc::new(processor))
            }
            ProcessorConfig::Sandbox => Ok(Arc::new(SandboxProcessor::new())),
        }
    }

    pub fn sink(
        &self,
        manifest: &Manifest,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<Arc<dyn ErrorSink>, RunCommandError> {
        match &manifest.reporting {
            ReportingConfig::Log => Ok(Arc::new(TracingSink)),
            ReportingConfig::CloudLogging {
                project_id,
                access_token_env,
            } => {
                let token = secret(access_token_env, lookup)?;
                Ok(Arc::new(CloudLoggingSink::new(project_id.clone(), token)))
            }
        }
    }

    pub fn token_secret(
        &self,
        manifest: &Manifest,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<String, RunCommandError> {
        match secret(&manifest.auth.token_secret_env, lookup) {
            Ok(value) => Ok(value),
            Err(_) if self.uses_sandbox(manifest) => Ok(SANDBOX_TOKEN_SECRET.to_string()),
            Err(e) => Err(e),
        }
    }

    pub async fn execute(&self, ctx: &Context) -> Result<(), RunCommandError> {
        let manifest = &ctx.manifest;
        let host = self.host.clone().unwrap_or_else(|| manifest.server.host.clone());
        let port = self.port.unwrap_or(manifest.server.port);

        let processor = self.processor(manifest, &env_lookup)?;
        let sink = self.sink(manifest, &env_lookup)?;
        let token_secret = self.token_secret(manifest, &env_lookup)?;

        println!();
        println!("{}", style("Storefront").green().bold());
        println!(
            "{} {}",
            style("Processor").dim(),
            processor.name()
        );
        println!("{} {}:{}", style("Listening").dim(), host, port);
        println!();
        println!("{}", style("Endpoints").dim());
        println!(" {} http://localhost:{}/health", get(), port);
        println!(
            " {} http://localhost:{}/functions/createStripeCheckoutForUser",
            post(),
            port
        );
        println!(
            " {} http://localhost:{}/functions/createAnonymousStripeCheckout",
            post(),
            port
        );
        println!(" {} http://localhost:{}/routes/resolve?path=/", get(), port);
        println!(" {} http://localhost:{}/db/listen", get(), port);
        println!(" {}", style(" ...").dim());
        println!();
        println!("{}", style("Press Ctrl+C to stop").dim());
        println!();

        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
        tracing::info!(processor = processor.name(), %host, port, "Starting storefront");

        let config = manifest.storefront_config(token_secret);
        let storefront = Storefront::new(config, processor, sink);

        storefront
            .serve(&host, port)
            .await
            .map_err(RunCommandError::ServerStart)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn command(sandbox: bool) -> RunCommand {
        RunCommand {
            port: None,
            host: None,
            sandbox,
        }
    }

    #[test]
    fn test_sandbox_flag_overrides_manifest() {
        let manifest = Manifest::default();
        let processor = command(true).processor(&manifest, &lookup(&[])).unwrap();
        assert_eq!(processor.name(), "sandbox");
    }

    #[test]
    fn test_stripe_requires_secret_key() {
        let manifest = Manifest::default();
        let err = command(false)
            .processor(&manifest, &lookup(&[]))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Environment variable STRIPE_SECRET_KEY is not set");

        let processor = command(false)
            .processor(&manifest, &lookup(&[("STRIPE_SECRET_KEY", "sk_test_1")]))
            .unwrap();
        assert_eq!(processor.name(), "stripe");
    }

    #[test]
    fn test_token_secret_falls_back_in_sandbox() {
        let manifest = Manifest::default();
        assert_eq!(
            command(true).token_secret(&manifest, &lookup(&[])).unwrap(),
            SANDBOX_TOKEN_SECRET
        );
        assert!(command(false).token_secret(&manifest, &lookup(&[])).is_err());
        assert_eq!(
            command(false)
                .token_secret(&manifest, &lookup(&[("STOREFRONT_TOKEN_SECRET", "abc")]))
                .unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_cloud_logging_sink_needs_token() {
        let manifest = Manifest {
            reporting: ReportingConfig::CloudLogging {
                project_id: "shop".to_string(),
                access_token_env: "GCP_TOKEN".to_string(),
            },
            ..Manifest::default()
        };
        assert!(command(true).sink(&manifest, &lookup(&[])).is_err());
        assert!(
            command(true)
                .sink(&manifest, &lookup(&[("GCP_TOKEN", "ya29")]))
                .is_ok()
        );
    }
}
