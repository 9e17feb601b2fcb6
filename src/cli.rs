use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// MQTT broker host
    #[arg(long, env = "MQTT_SERVER", default_value = "127.0.0.1")]
    pub host: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub port: u16,

    /// MQTT user
    #[arg(long, env = "MQTT_USER", default_value = "")]
    pub user: String,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// MQTT client id (defaults to z2m-traffic-<pid>)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Base Zigbee2MQTT topic
    #[arg(long, default_value = "zigbee2mqtt")]
    pub base_topic: String,

    /// Reporting interval in seconds
    #[arg(long, default_value_t = 5)]
    pub interval: u64,

    /// Ignore <base-topic>/bridge traffic
    #[arg(long)]
    pub ignore_bridge: bool,

    /// Topic depth used as the aggregation key
    #[arg(long, default_value_t = 1)]
    pub detail: u32,

    /// How reports are rendered
    #[arg(long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Full screen table
    Tui,
    /// Redraw a plain text report every interval
    Plain,
    /// One JSON report per line
    Json,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--detail must be at least 1")]
    ZeroDetail,
    #[error("--interval must be at least 1 second")]
    ZeroInterval,
    #[error("--base-topic must not be empty")]
    EmptyBaseTopic,
}

/// Broker connection settings.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
}

/// Settings fixed at startup and shared read-only by every thread.
#[derive(Clone, Debug)]
pub struct Config {
    pub broker: BrokerConfig,
    pub base_topic: String,
    pub detail_depth: u32,
    pub ignore_bridge: bool,
    pub report_interval: Duration,
    pub output: OutputFormat,
    pub duration: Option<Duration>,
}

impl Config {
    /// `interactive` picks the default sink when `--output` is absent.
    pub fn from_cli(cli: Cli, interactive: bool) -> Result<Self, ConfigError> {
        if cli.detail == 0 {
            return Err(ConfigError::ZeroDetail);
        }
        if cli.interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let base_topic = cli.base_topic.trim_end_matches('/').to_string();
        if base_topic.is_empty() {
            return Err(ConfigError::EmptyBaseTopic);
        }
        let credentials = if !cli.user.is_empty() && !cli.password.is_empty() {
            Some((cli.user, cli.password))
        } else {
            None
        };
        let default_output = if interactive {
            OutputFormat::Tui
        } else {
            OutputFormat::Plain
        };
        Ok(Self {
            broker: BrokerConfig {
                host: cli.host,
                port: cli.port,
                client_id: cli
                    .client_id
                    .unwrap_or_else(|| format!("z2m-traffic-{}", std::process::id())),
                credentials,
            },
            base_topic,
            detail_depth: cli.detail,
            ignore_bridge: cli.ignore_bridge,
            report_interval: Duration::from_secs(cli.interval),
            output: cli.output.unwrap_or(default_output),
            duration: cli.duration.map(Duration::from_secs),
        })
    }

    pub fn subscription(&self) -> String {
        format!("{}/#", self.base_topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["z2m-traffic"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_cli(parse(&["--host", "broker.local"]), false).unwrap();
        assert_eq!(cfg.broker.host, "broker.local");
        assert_eq!(cfg.base_topic, "zigbee2mqtt");
        assert_eq!(cfg.detail_depth, 1);
        assert!(!cfg.ignore_bridge);
        assert_eq!(cfg.report_interval, Duration::from_secs(5));
        assert_eq!(cfg.output, OutputFormat::Plain);
        assert_eq!(cfg.subscription(), "zigbee2mqtt/#");
        assert!(cfg.duration.is_none());
        assert!(cfg.broker.client_id.starts_with("z2m-traffic-"));
    }

    #[test]
    fn interactive_defaults_to_tui() {
        let cfg = Config::from_cli(parse(&[]), true).unwrap();
        assert_eq!(cfg.output, OutputFormat::Tui);
        let cfg = Config::from_cli(parse(&["--output", "json"]), true).unwrap();
        assert_eq!(cfg.output, OutputFormat::Json);
    }

    #[test]
    fn flags_are_applied() {
        let cfg = Config::from_cli(
            parse(&[
                "--base-topic",
                "z2m/",
                "--detail",
                "2",
                "--ignore-bridge",
                "--interval",
                "1",
                "--duration",
                "30",
                "--client-id",
                "garage-monitor",
            ]),
            false,
        )
        .unwrap();
        assert_eq!(cfg.base_topic, "z2m");
        assert_eq!(cfg.detail_depth, 2);
        assert!(cfg.ignore_bridge);
        assert_eq!(cfg.report_interval, Duration::from_secs(1));
        assert_eq!(cfg.duration, Some(Duration::from_secs(30)));
        assert_eq!(cfg.broker.client_id, "garage-monitor");
    }

    #[test]
    fn credentials_need_user_and_password() {
        let cfg = Config::from_cli(parse(&["--user", "u", "--password", "p"]), false).unwrap();
        assert_eq!(cfg.broker.credentials, Some(("u".into(), "p".into())));
        let cfg = Config::from_cli(parse(&["--user", "u", "--password", ""]), false).unwrap();
        assert!(cfg.broker.credentials.is_none());
    }

    #[test]
    fn invalid_values_rejected() {
        assert_eq!(
            Config::from_cli(parse(&["--detail", "0"]), false).unwrap_err(),
            ConfigError::ZeroDetail
        );
        assert_eq!(
            Config::from_cli(parse(&["--interval", "0"]), false).unwrap_err(),
            ConfigError::ZeroInterval
        );
        assert_eq!(
            Config::from_cli(parse(&["--base-topic", "/"]), false).unwrap_err(),
            ConfigError::EmptyBaseTopic
        );
    }
}
