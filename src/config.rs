use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::rpc::ChannelCapacity;
use crate::services::GreetSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub channel_capacity: ChannelCapacity,
    pub default_timeout: Option<Duration>,
    pub greet: GreetSettings,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),
    #[error("CALL_DEFAULT_TIMEOUT_MS must be greater than zero")]
    ZeroTimeout,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |name: &'static str| {
            var(name)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber(name))
                })
                .transpose()
        };

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = var("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(50051);

        let channel_capacity = number("CALL_CHANNEL_CAPACITY")?
            .map(|capacity| usize::try_from(capacity).unwrap_or(usize::MAX))
            .map(ChannelCapacity::from_config)
            .unwrap_or(ChannelCapacity::Bounded(16));

        let default_timeout = match number("CALL_DEFAULT_TIMEOUT_MS")? {
            Some(0) => return Err(ConfigError::ZeroTimeout),
            other => other.map(Duration::from_millis),
        };

        let defaults = GreetSettings::default();
        let greet = GreetSettings {
            stream_interval: number("GREET_STREAM_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.stream_interval),
            deadline_step: number("GREET_DEADLINE_STEP_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.deadline_step),
        };

        let config = Self {
            bind_addr,
            bind_port,
            channel_capacity,
            default_timeout,
            greet,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = config_from(&[]).expect("config should parse");

        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 50051);
        assert_eq!(config.channel_capacity, ChannelCapacity::Bounded(16));
        assert_eq!(config.default_timeout, None);
        assert_eq!(config.greet, GreetSettings::default());
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("BIND_ADDR", "0.0.0.0"),
            ("BIND_PORT", "9000"),
            ("CALL_CHANNEL_CAPACITY", "0"),
            ("CALL_DEFAULT_TIMEOUT_MS", "2500"),
            ("GREET_STREAM_INTERVAL_MS", "10"),
            ("GREET_DEADLINE_STEP_MS", " 20 "),
        ])
        .expect("config should parse");

        assert_eq!(config.bind_socket(), Ok("0.0.0.0:9000".parse().expect("addr")));
        assert_eq!(config.channel_capacity, ChannelCapacity::Unbounded);
        assert_eq!(config.default_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.greet.stream_interval, Duration::from_millis(10));
        assert_eq!(config.greet.deadline_step, Duration::from_millis(20));
    }

    #[test]
    fn invalid_port_fails() {
        let err = config_from(&[("BIND_PORT", "70000")]).expect_err("port out of range");
        assert_eq!(err, ConfigError::InvalidPort);
    }

    #[test]
    fn invalid_numbers_name_the_variable() {
        let err = config_from(&[("CALL_CHANNEL_CAPACITY", "-1")]).expect_err("negative");
        assert_eq!(err, ConfigError::InvalidNumber("CALL_CHANNEL_CAPACITY"));
        assert_eq!(
            err.to_string(),
            "CALL_CHANNEL_CAPACITY must be a non-negative integer"
        );
    }

    #[test]
    fn zero_timeout_fails() {
        let err = config_from(&[("CALL_DEFAULT_TIMEOUT_MS", "0")]).expect_err("zero");
        assert_eq!(err, ConfigError::ZeroTimeout);
    }

    #[test]
    fn invalid_bind_addr_fails() {
        let err = config_from(&[("BIND_ADDR", "not an address")]).expect_err("bad addr");
        assert_eq!(err, ConfigError::InvalidSocket);
    }
}
