use gateway::config::Config as GatewayConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize)]
pub struct LoggingConfig {
    /// tracing env-filter directive, e.g. "info" or "gateway=debug"
    pub filter: Option<String>,
}

#[derive(Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.gateway.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid gateway config: {0}")]
    InvalidConfig(#[from] gateway::config::ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    fn gateway_yaml() -> &'static str {
        r#"
metrics:
    statsd_host: 127.0.0.1
    statsd_port: 8125
gateway:
    listener:
        host: 0.0.0.0
        port: 8080
    admin_listener:
        host: 127.0.0.1
        port: 8081
    backends:
        - name: posts
          url: http://post-service:8082
    routes:
        - match:
            path: /posts/**
          action:
            proxy:
                backend: posts
"#
    }

    #[test]
    fn test_load_config() {
        let tmp = write_tmp_file(gateway_yaml());
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_host, "127.0.0.1");
        assert_eq!(metrics.statsd_port, 8125);
        assert!(config.logging.is_none());
        assert_eq!(config.gateway.listener.port, 8080);
    }

    #[test]
    fn test_invalid_gateway_config_rejected() {
        let yaml = gateway_yaml().replace("backend: posts", "backend: missing");
        let tmp = write_tmp_file(&yaml);

        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::InvalidConfig(_))
        ));
    }
}
