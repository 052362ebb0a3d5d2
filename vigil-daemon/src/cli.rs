//! CLI argument definitions for vigil-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use vigil_core::config::VigilConfig;

/// Vigil scan job daemon.
///
/// Runs the polling dispatcher that drives scan jobs through the external
/// scanner and serves the HTTP API for submitting and inspecting them.
#[derive(Parser, Debug)]
#[command(name = "vigil-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to vigil.toml configuration file.
    #[arg(short, long, default_value = "vigil.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut VigilConfig) {
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.general.log_format = format.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_config() {
        let cli = DaemonCli::parse_from(["vigil-daemon"]);
        assert_eq!(cli.config, PathBuf::from("vigil.toml"));
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides_take_precedence() {
        let cli = DaemonCli::parse_from([
            "vigil-daemon",
            "-c",
            "/tmp/vigil.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert!(cli.validate);

        let mut config = VigilConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
    }
}
