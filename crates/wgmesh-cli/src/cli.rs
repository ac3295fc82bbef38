//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// WireGuard mesh network manager.
#[derive(Parser, Debug, Clone)]
#[command(name = "mesh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Mesh configuration file, or - for stdin.
    #[arg(short, long, default_value = "mesh.yaml")]
    pub file: PathBuf,

    /// Input JSON instead of YAML (default: use file ext).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Output JSON instead of YAML.
    #[arg(short = 'J', long = "json-out")]
    pub json_out: bool,

    /// Suppress output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Bring up mesh.
    Up {
        /// Show mesh info after bringing up.
        #[arg(short, long)]
        info: bool,
    },

    /// Bring down mesh.
    Down {
        /// Remove WireGuard interface configs.
        #[arg(short, long)]
        remove: bool,
    },

    /// Sync mesh.
    Sync,

    /// Show mesh WireGuard info.
    Show,

    /// Show mesh network info.
    Info,

    /// Print desired per-node WireGuard configs.
    Conf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_up() {
        let cli = Cli::parse_from(["mesh", "up"]);
        assert!(matches!(cli.command, Commands::Up { info: false }));
    }

    #[test]
    fn cli_parses_up_with_info() {
        let cli = Cli::parse_from(["mesh", "up", "-i"]);
        assert!(matches!(cli.command, Commands::Up { info: true }));
    }

    #[test]
    fn cli_parses_down_with_remove() {
        let cli = Cli::parse_from(["mesh", "down", "-r"]);
        assert!(matches!(cli.command, Commands::Down { remove: true }));
    }

    #[test]
    fn cli_respects_file_flag() {
        let cli = Cli::parse_from(["mesh", "-f", "prod.yaml", "sync"]);
        assert_eq!(cli.file, PathBuf::from("prod.yaml"));
    }

    #[test]
    fn cli_respects_format_flags() {
        let cli = Cli::parse_from(["mesh", "-j", "-J", "info"]);
        assert!(cli.json);
        assert!(cli.json_out);
        assert!(!cli.quiet);
    }

    #[test]
    fn cli_parses_conf() {
        let cli = Cli::parse_from(["mesh", "-q", "conf"]);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Conf));
    }
}
