use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Context, Result};
use serde::Deserialize;

use crate::domain::{GenerationRequest, ImageQuality, ImageSize, TaskSpec};

#[derive(Debug, Parser)]
#[command(
    name = "pg",
    about = "Generate comic panel images across rate-limited providers with retries and fallback",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/panelgen/logs/panelgen.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short, long, global = true, help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate every panel listed in a JSON or YAML file
    Run {
        /// File containing a list of panels ({panel_id, prompt, ...})
        panels: PathBuf,

        /// Primary provider for panels that do not name one
        #[arg(short, long)]
        provider: Option<String>,

        /// Give up waiting after this many seconds
        #[arg(short, long)]
        timeout_secs: Option<u64>,

        /// Include base64 image bytes in the report
        #[arg(long)]
        include_bytes: bool,
    },

    /// Estimate the cost of generating N images with each provider
    Estimate {
        /// Number of images
        count: usize,

        /// Image size, e.g. 1024x1024
        #[arg(short, long)]
        size: Option<ImageSize>,

        /// Image quality (standard, hd)
        #[arg(short, long)]
        quality: Option<ImageQuality>,
    },

    /// List configured providers
    Providers {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// One entry of a panels file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PanelInput {
    pub panel_id: String,
    pub prompt: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub size: Option<ImageSize>,
    #[serde(default)]
    pub quality: Option<ImageQuality>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl PanelInput {
    /// Task spec for this panel; `default_provider` applies when none is named
    pub fn into_spec(self, default_provider: Option<&str>) -> TaskSpec {
        let request = GenerationRequest {
            prompt: self.prompt,
            provider_name: self.provider.or_else(|| default_provider.map(str::to_string)),
            size: self.size,
            quality: self.quality,
            params: self.params,
        };
        TaskSpec::new("").with_id(self.panel_id).with_request(request)
    }
}

/// Parse a panels file; YAML parsing covers JSON input too
pub fn load_panels(path: &Path) -> Result<Vec<PanelInput>> {
    let content = fs::read_to_string(path).context(format!("Failed to read panels file {}", path.display()))?;
    let panels: Vec<PanelInput> =
        serde_yaml::from_str(&content).context(format!("Failed to parse panels file {}", path.display()))?;
    Ok(panels)
}
