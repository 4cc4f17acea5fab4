//! Command-line arguments and request assembly.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use provisioning::{ProvisioningConfig, ProvisioningRequest};

/// Provision ordered queues fronted by an HTTP API.
#[derive(Debug, Parser)]
#[command(name = "gatewire", version, about, long_about = None)]
pub struct Cli {
    /// Requests as `queue:api[:function]`. The function part may itself
    /// contain colons, so full function ARNs are accepted.
    #[arg(value_name = "QUEUE:API[:FUNCTION]")]
    pub pairs: Vec<String>,

    /// JSON file holding an array of requests, run before any positional ones.
    #[arg(long, value_name = "FILE")]
    pub requests: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, env = "GATEWIRE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Region override.
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Run against in-memory providers instead of AWS.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    #[arg(long, value_enum, env = "GATEWIRE_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Loads the configuration file (or defaults) and applies flag overrides.
    pub fn load_config(&self) -> Result<ProvisioningConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                ProvisioningConfig::from_json(&text)
                    .with_context(|| format!("loading config {}", path.display()))?
            }
            None => ProvisioningConfig::default(),
        };
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        config.validate().context("validating configuration")?;
        Ok(config)
    }

    /// Collects requests from `--requests` and the positional arguments.
    pub fn collect_requests(&self) -> Result<Vec<ProvisioningRequest>> {
        let mut requests = match &self.requests {
            Some(path) => read_requests(path)?,
            None => Vec::new(),
        };
        for pair in &self.pairs {
            requests.push(parse_pair(pair)?);
        }
        if requests.is_empty() {
            bail!("no requests given; pass QUEUE:API[:FUNCTION] arguments or --requests FILE");
        }
        Ok(requests)
    }
}

fn read_requests(path: &Path) -> Result<Vec<ProvisioningRequest>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading requests {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing requests {}", path.display()))
}

/// Parses `queue:api[:function]`.
pub fn parse_pair(pair: &str) -> Result<ProvisioningRequest> {
    let mut parts = pair.splitn(3, ':');
    let queue = parts.next().unwrap_or_default();
    let Some(api) = parts.next() else {
        bail!("'{pair}' is not of the form QUEUE:API[:FUNCTION]");
    };
    let request = ProvisioningRequest::new(queue, api);
    Ok(match parts.next() {
        Some(function) => request.with_target_function(function),
        None => request,
    })
}
