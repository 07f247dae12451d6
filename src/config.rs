//! Global configuration for mcp402
//!
//! Configuration is merged from, lowest to highest precedence:
//! - built-in defaults
//! - a JSON file or inline JSON string (`--config` / `MCP402_CONFIG`)
//! - individual CLI flags and their environment variables
//!
//! The result is immutable once built; the server derives its
//! [`PaymentConfig`] and facilitator client from it at startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::x402::{FacilitatorClient, Network, PaymentConfig, PaymentDestination};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_PAYEE_NAME: &str = "mcp402 Resource Server";

// ============================================================================
// Configuration Arguments
// ============================================================================

/// Common configuration arguments
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Configuration file (JSON file path or JSON string).
    ///
    /// - A file path: --config mcp402.json
    ///
    /// - Inline JSON: --config '{"destination":"0xabc...","network":"base"}'
    ///
    #[arg(long = "config", short = 'c', env = "MCP402_CONFIG", value_name = "file.json or {json}")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, short = 'p', env = "PORT")]
    pub port: Option<u16>,

    /// x402 facilitator URL used to verify and settle payments
    #[arg(long = "facilitator-url", short = 'f', env = "MCP402_FACILITATOR_URL", value_name = "http(s)://...")]
    pub facilitator_url: Option<String>,

    /// Facilitator request timeout in seconds
    #[arg(long, env = "MCP402_FACILITATOR_TIMEOUT", value_name = "SECS")]
    pub facilitator_timeout: Option<u64>,

    /// Address that receives payments
    #[arg(long, env = "MCP402_DESTINATION")]
    pub destination: Option<String>,

    /// Settlement network of the destination (default: base)
    #[arg(long, env = "MCP402_NETWORK")]
    pub network: Option<Network>,

    /// Display name of the payee, shown to paying clients
    #[arg(long, env = "MCP402_PAYEE_NAME")]
    pub payee_name: Option<String>,

    /// Accept paid requests over plain HTTP (development only)
    #[arg(long, env = "MCP402_ALLOW_HTTP")]
    pub allow_http: bool,

    // -------------------------------------------------------------------------
    // Logging/Tracing Options
    // -------------------------------------------------------------------------

    /// Enable verbose output (INFO level logging)
    ///
    /// Default is WARN level. Use -v for INFO, -d for DEBUG.
    ///
    #[arg(short = 'v', long, env = "MCP402_VERBOSE")]
    pub verbose: bool,

    /// Enable debug output (DEBUG level logging)
    #[arg(short = 'd', long, env = "MCP402_DEBUG", conflicts_with = "verbose")]
    pub debug: bool,

    /// Quiet mode - only show errors
    #[arg(short = 'q', long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Silent mode - suppress all terminal log output
    ///
    /// Log file output (if configured) is unaffected.
    ///
    #[arg(long, short = 's', conflicts_with_all = ["verbose", "debug", "quiet"])]
    pub silent: bool,

    /// Log output format
    #[arg(long, short = 'L', default_value = "pretty", value_enum, env = "MCP402_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Write debug logs to file
    #[arg(long, short = 'l', env = "MCP402_LOG_FILE", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

// ============================================================================
// Global Configuration
// ============================================================================

/// Global configuration (can be loaded from JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Port for the server to listen on
    pub port: Option<u16>,

    /// x402 facilitator URL for payment verification and settlement
    pub facilitator_url: Option<String>,

    /// Facilitator request timeout in seconds
    pub facilitator_timeout: Option<u64>,

    /// Payment destination address
    pub destination: Option<String>,

    /// Payment destination network
    pub network: Option<Network>,

    /// Payee display name
    pub payee_name: Option<String>,

    /// Allow plain HTTP for paid requests
    pub allow_http: bool,

    /// How long a quoted payment requirement stays valid
    pub max_timeout_seconds: Option<u64>,

    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    pub silent: bool,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load configuration, CLI args taking precedence over the config file
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        let mut global = match &args.config {
            Some(input) => {
                let json = load_json_string(input)?;
                serde_json::from_str(&json).context("Failed to parse config JSON")?
            }
            None => GlobalConfig::default(),
        };
        global.merge_args(args);
        Ok(global)
    }

    fn merge_args(&mut self, args: &ConfigArgs) {
        if let Some(port) = args.port {
            self.port = Some(port);
        }
        if let Some(url) = &args.facilitator_url {
            self.facilitator_url = Some(url.clone());
        }
        if let Some(timeout) = args.facilitator_timeout {
            self.facilitator_timeout = Some(timeout);
        }
        if let Some(destination) = &args.destination {
            self.destination = Some(destination.clone());
        }
        if let Some(network) = args.network {
            self.network = Some(network);
        }
        if let Some(name) = &args.payee_name {
            self.payee_name = Some(name.clone());
        }
        if args.allow_http {
            self.allow_http = true;
        }

        if args.verbose {
            self.verbose = true;
        }
        if args.debug {
            self.debug = true;
        }
        if args.quiet {
            self.quiet = true;
        }
        if args.silent {
            self.silent = true;
        }
        // Always take log_format from CLI (it has a default value)
        self.log_format = args.log_format.clone();
        if let Some(log_file) = &args.log_file {
            self.log_file = Some(log_file.clone());
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn network(&self) -> Network {
        self.network.unwrap_or(Network::Base)
    }

    /// Build the immutable payment middleware configuration
    pub fn payment_config(&self) -> Result<PaymentConfig> {
        let address = self.destination.as_deref().filter(|d| !d.trim().is_empty()).ok_or_else(|| {
            anyhow::anyhow!(
                "Payment destination required. Specify via --destination, MCP402_DESTINATION env var, or config file"
            )
        })?;
        let payee_name = self.payee_name.as_deref().unwrap_or(DEFAULT_PAYEE_NAME);

        let mut config = PaymentConfig::new(PaymentDestination::new(address.trim(), self.network()), payee_name)
            .allow_insecure(self.allow_http);
        if let Some(secs) = self.max_timeout_seconds {
            config.max_timeout_seconds = secs;
        }
        Ok(config)
    }

    /// Build the facilitator client
    pub fn facilitator(&self) -> Result<FacilitatorClient> {
        let url = self.facilitator_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "Facilitator URL required. Specify via --facilitator-url, MCP402_FACILITATOR_URL env var, or config file"
            )
        })?;
        let client = FacilitatorClient::try_from(url)
            .with_context(|| format!("Invalid facilitator URL '{}'", url))?;
        Ok(match self.facilitator_timeout {
            Some(secs) => client.with_timeout(Duration::from_secs(secs)),
            None => client,
        })
    }

    /// Install the global tracing subscriber. Call once, early in main().
    pub fn init_tracing(&self) {
        crate::logging::init_tracing(crate::logging::TracingConfig {
            verbose: self.verbose,
            debug: self.debug,
            quiet: self.quiet,
            silent: self.silent,
            format: self.log_format.clone(),
            log_file: self.log_file.clone(),
        });
    }
}

/// Accept either inline JSON or a path to a JSON file
fn load_json_string(input: &str) -> Result<String> {
    if input.trim_start().starts_with('{') {
        return Ok(input.to_string());
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read config file '{}'", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: Option<&str>) -> ConfigArgs {
        ConfigArgs { config: config.map(str::to_string), ..Default::default() }
    }

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::from_args(&args(None)).unwrap();
        assert_eq!(config.port(), 3000);
        assert_eq!(config.network(), Network::Base);
        assert!(!config.allow_http);
    }

    #[test]
    fn test_inline_json_and_cli_precedence() {
        let mut cli = args(Some(r#"{"port": 8080, "destination": "0xfile", "network": "base-sepolia", "allow_http": true}"#));
        cli.destination = Some("0xcli".to_string());
        let config = GlobalConfig::from_args(&cli).unwrap();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.network(), Network::BaseSepolia);

        let payment = config.payment_config().unwrap();
        assert_eq!(payment.destination.address, "0xcli");
        assert_eq!(payment.payee_name, DEFAULT_PAYEE_NAME);
        assert!(payment.allow_insecure);
    }

    #[test]
    fn test_missing_destination_names_the_flag() {
        let config = GlobalConfig::from_args(&args(None)).unwrap();
        let err = config.payment_config().unwrap_err().to_string();
        assert!(err.contains("--destination"));
        assert!(err.contains("MCP402_DESTINATION"));
    }

    #[test]
    fn test_facilitator_requires_url() {
        let mut config = GlobalConfig::default();
        assert!(config.facilitator().is_err());
        config.facilitator_url = Some("https://facilitator.example.com".to_string());
        config.facilitator_timeout = Some(5);
        assert!(config.facilitator().is_ok());
    }

    #[test]
    fn test_bad_config_json() {
        assert!(GlobalConfig::from_args(&args(Some("{not json"))).is_err());
        assert!(GlobalConfig::from_args(&args(Some("/nonexistent/mcp402.json"))).is_err());
    }

    #[test]
    fn test_unknown_network_in_file() {
        assert!(GlobalConfig::from_args(&args(Some(r#"{"network": "narnia"}"#))).is_err());
    }
}
