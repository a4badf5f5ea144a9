//! Config command implementation.

use herakles_proc_sampler::Config;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;

/// Writes the default configuration in the requested format.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("herakles-proc-sampler.yaml"));

    let content = render_config(&config, format, commented)?;

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Serializes a config. Comments are only added to YAML output.
pub fn render_config(
    config: &Config,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => {
            let content = serde_yaml::to_string(config)?;
            if commented {
                add_config_comments(content)
            } else {
                content
            }
        }
    })
}

fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Process Sampler Configuration
# ======================================
#
# Sampling
# --------
# staleness_ms: 1000         # Snapshot age that triggers a background refresh
# workers: 4                 # Background refresh threads
# entry_ttl_ms: 300000       # Drop processes not queried for this long
# max_entries: 4096          # Cache capacity, oldest entries evicted first
# request_privileges: true   # Check for CAP_SYS_PTRACE / root at startup
# proc_root: "/proc"         # procfs mount point
#
# Server Configuration
# --------------------
# bind: "127.0.0.1"          # Bind IP
# port: 9216                 # HTTP port
# tls_cert: null             # PEM certificate, enables HTTPS with tls_key
# tls_key: null              # PEM private key
#
# Logging
# -------
# log_level: "info"          # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commented_yaml_parses_back() {
        let text = render_config(&Config::default(), ConfigFormat::Yaml, true).unwrap();
        assert!(text.starts_with("# Herakles Process Sampler Configuration"));
        let parsed: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_toml_output_parses_back() {
        let text = render_config(&Config::default(), ConfigFormat::Toml, false).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, Config::default().port);
    }
}
