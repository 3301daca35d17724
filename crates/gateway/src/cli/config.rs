use lh_domain::config::{Config, ConfigSeverity};

/// Validate the config, printing any issues.  Returns `false` when at
/// least one error was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Render the resolved config (with all defaults filled in) as TOML.
pub fn render(config: &Config) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serializing config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(validate(&Config::default(), "config.toml"));
    }

    #[test]
    fn inverted_delays_fail_validation() {
        let mut config = Config::default();
        config.sessions.retry_base_delay_ms = 10_000;
        config.sessions.retry_max_delay_ms = 1_000;
        assert!(!validate(&config, "config.toml"));
    }

    #[test]
    fn rendered_config_round_trips() {
        let rendered = render(&Config::default()).unwrap();
        assert!(rendered.contains("[sessions]"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.sessions.max_retry_attempts, 5);
    }
}
