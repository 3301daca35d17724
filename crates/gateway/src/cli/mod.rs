pub mod config;

use clap::{Parser, Subcommand};

/// LinkHub: a multi-tenant messaging session gateway.
#[derive(Debug, Parser)]
#[command(name = "linkhub", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `LH_CONFIG` (or
/// `config.toml` by default).  A missing file yields all defaults.
/// Returns the parsed config and the path that was used.
pub fn load_config() -> anyhow::Result<(lh_domain::config::Config, String)> {
    let config_path = std::env::var("LH_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<lh_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(lh_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_from("/definitely/not/here.toml").unwrap();
        assert_eq!(config.server.port, 3310);
        assert!(config.sessions.resume_on_boot);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[sessions]\nmax_retry_attempts = 2\n",
        )
        .unwrap();
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sessions.max_retry_attempts, 2);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config_from(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn cli_parses_config_subcommands() {
        let cli = Cli::parse_from(["linkhub", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
        let cli = Cli::parse_from(["linkhub"]);
        assert!(cli.command.is_none());
    }
}
