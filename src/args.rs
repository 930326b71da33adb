//! Command line arguments

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug, Clone)]
#[command(name = "cas-gateway")]
#[command(about = "Reverse proxy that authenticates visitors against a CAS server")]
#[command(version)]
pub struct Args {
    /// Configuration file, takes precedence over `--config`
    #[arg(value_name = "CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Path to the YAML configuration file
    #[arg(
        short = 'c',
        long = "config",
        env = "CAS_GATEWAY_CONFIG",
        default_value = "config.yaml"
    )]
    pub config: PathBuf,

    /// Listen port, overrides `server.port`
    #[arg(short = 'p', long = "port", env = "CAS_GATEWAY_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Listen address, overrides `server.host`
    #[arg(long = "host", env = "CAS_GATEWAY_HOST")]
    pub host: Option<String>,
}

impl Args {
    /// The configuration file to load
    pub fn config_path(&self) -> &Path {
        self.config_path.as_deref().unwrap_or(&self.config)
    }

    /// Apply command line overrides on top of the loaded file
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
    }
}
