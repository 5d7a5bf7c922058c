//! Command-line interface.
//!
//! `serve` runs the daemon, `gc` cleans a cache folder offline and `hash`
//! prints the signature of a request without running it.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cache::GcLevel;
use crate::config::DaemonConfig;

/// How much the garbage collector removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GcLevelArg {
    /// Expired artifacts and artifacts whose sources are gone
    #[default]
    Default,
    /// Every artifact
    Purge,
}

impl From<GcLevelArg> for GcLevel {
    fn from(arg: GcLevelArg) -> Self {
        match arg {
            GcLevelArg::Default => GcLevel::Default,
            GcLevelArg::Purge => GcLevel::Purge,
        }
    }
}

/// vt-daemon: audio processing stacks with a content-addressed cache
#[derive(Parser, Debug)]
#[command(name = "vt-daemon")]
#[command(about = "Audio processing-stack daemon with a content-addressed result cache")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML). Defaults to the first vt-daemon.toml found
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon
    Serve {
        /// Address to listen on
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Cache folder
        #[arg(long)]
        cache_path: Option<PathBuf>,
    },

    /// Remove stale artifacts from a cache folder
    Gc {
        /// Cache folder (defaults to the configured one)
        folder: Option<PathBuf>,

        /// What to remove
        #[arg(short, long, value_enum, default_value_t = GcLevelArg::Default)]
        level: GcLevelArg,

        /// Only report what would be removed
        #[arg(short, long)]
        simulate: bool,
    },

    /// Print the signature of a process request given as JSON
    Hash {
        /// Request object, e.g. '{"file":"a.wav","stack":[]}'
        request: String,
    },
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut DaemonConfig) {
        match &self.command {
            Command::Serve {
                host,
                port,
                cache_path,
            } => {
                if let Some(host) = host {
                    config.host = host.clone();
                }
                if let Some(port) = port {
                    config.port = *port;
                }
                if let Some(path) = cache_path {
                    config.cache_path = Some(path.clone());
                }
            }
            Command::Gc {
                folder: Some(folder),
                ..
            } => config.cache_path = Some(folder.clone()),
            Command::Gc { folder: None, .. } | Command::Hash { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_overrides() {
        let cli = Cli::try_parse_from(["vt-daemon", "serve", "--port", "2000", "--cache-path", "/tmp/c"]).unwrap();
        let mut config = DaemonConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.port, 2000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/c")));
    }

    #[test]
    fn gc_defaults() {
        let cli = Cli::try_parse_from(["vt-daemon", "gc", "/srv/cache"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Gc {
                folder: Some(PathBuf::from("/srv/cache")),
                level: GcLevelArg::Default,
                simulate: false,
            }
        );
        let mut config = DaemonConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.cache_path, Some(PathBuf::from("/srv/cache")));
    }

    #[test]
    fn gc_purge_simulate() {
        let cli = Cli::try_parse_from(["vt-daemon", "gc", "--level", "purge", "-s"]).unwrap();
        match cli.command {
            Command::Gc { folder, level, simulate } => {
                assert!(folder.is_none());
                assert_eq!(GcLevel::from(level), GcLevel::Purge);
                assert!(simulate);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_config_flag() {
        let cli = Cli::try_parse_from(["vt-daemon", "hash", "{}", "--config", "vt.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("vt.toml")));
        assert!(matches!(cli.command, Command::Hash { .. }));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["vt-daemon"]).is_err());
        assert!(Cli::try_parse_from(["vt-daemon", "gc", "--level", "everything"]).is_err());
    }
}
