//! Configuration for the retry spout

use crate::backoff::BackoffConfig;
use crate::error::{Result, SpoutError};
use crate::source::Subscription;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for a spout
#[derive(Debug, Clone)]
pub struct SpoutConfig {
    /// Service endpoint of the message source
    pub service_url: String,

    /// Topic to consume
    pub topic: String,

    /// Subscription name
    pub subscription: String,

    /// Component id, first half of the spout id
    pub component_id: String,

    /// Task id, second half of the spout id
    pub task_id: u32,

    /// How long after its first failure a message may still be retried
    /// (`None` = no limit)
    pub failed_retries_timeout: Option<Duration>,

    /// How many times a failed message may be requeued (`None` = unlimited)
    pub max_failed_retries: Option<u32>,

    /// Redelivery backoff
    pub backoff: BackoffConfig,

    /// Bound on a single fresh receive
    pub receive_timeout: Duration,

    /// Length of one metrics reporting interval
    pub metrics_interval: Duration,

    /// Share one subscription between spouts of this process
    pub shared_consumer: bool,

    /// Metrics server address
    pub metrics_addr: SocketAddr,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for SpoutConfig {
    fn default() -> Self {
        Self {
            service_url: "memory://local".to_string(),
            topic: "events".to_string(),
            subscription: "retry-spout".to_string(),
            component_id: "spout".to_string(),
            task_id: 0,
            failed_retries_timeout: Some(Duration::from_secs(60)),
            max_failed_retries: None,
            backoff: BackoffConfig::default(),
            receive_timeout: Duration::from_millis(100),
            metrics_interval: Duration::from_secs(60),
            shared_consumer: false,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl SpoutConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Keys are the `SPOUT_*` environment variable names. Unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SpoutConfig::default();

        if let Some(url) = lookup("SPOUT_SERVICE_URL") {
            config.service_url = url;
        }
        if let Some(topic) = lookup("SPOUT_TOPIC") {
            config.topic = topic;
        }
        if let Some(subscription) = lookup("SPOUT_SUBSCRIPTION") {
            config.subscription = subscription;
        }
        if let Some(component) = lookup("SPOUT_COMPONENT_ID") {
            config.component_id = component;
        }
        if let Some(task) = lookup("SPOUT_TASK_ID") {
            config.task_id = parse("SPOUT_TASK_ID", &task)?;
        }

        // negative disables the limit
        if let Some(timeout) = lookup("SPOUT_FAILED_RETRIES_TIMEOUT_MS") {
            let millis: i64 = parse("SPOUT_FAILED_RETRIES_TIMEOUT_MS", &timeout)?;
            config.failed_retries_timeout =
                u64::try_from(millis).ok().map(Duration::from_millis);
        }
        if let Some(max) = lookup("SPOUT_MAX_FAILED_RETRIES") {
            let max: i64 = parse("SPOUT_MAX_FAILED_RETRIES", &max)?;
            config.max_failed_retries = if max < 0 {
                None
            } else {
                Some(u32::try_from(max).map_err(|e| {
                    SpoutError::Config(format!("invalid SPOUT_MAX_FAILED_RETRIES: {e}"))
                })?)
            };
        }

        if let Some(base) = lookup("SPOUT_BACKOFF_BASE_MS") {
            config.backoff.initial_delay = millis("SPOUT_BACKOFF_BASE_MS", &base)?;
        }
        if let Some(max) = lookup("SPOUT_BACKOFF_MAX_MS") {
            config.backoff.max_delay = millis("SPOUT_BACKOFF_MAX_MS", &max)?;
        }
        if let Some(timeout) = lookup("SPOUT_RECEIVE_TIMEOUT_MS") {
            config.receive_timeout = millis("SPOUT_RECEIVE_TIMEOUT_MS", &timeout)?;
        }
        if let Some(secs) = lookup("SPOUT_METRICS_INTERVAL_SECS") {
            config.metrics_interval =
                Duration::from_secs(parse("SPOUT_METRICS_INTERVAL_SECS", &secs)?);
        }

        if let Some(shared) = lookup("SPOUT_SHARED_CONSUMER") {
            config.shared_consumer = parse("SPOUT_SHARED_CONSUMER", &shared)?;
        }
        if let Some(addr) = lookup("SPOUT_METRICS_ADDR") {
            config.metrics_addr = parse("SPOUT_METRICS_ADDR", &addr)?;
        }
        if let Some(level) = lookup("SPOUT_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = lookup("SPOUT_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(SpoutError::Config(format!(
                        "invalid SPOUT_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the spout cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("service_url", &self.service_url),
            ("topic", &self.topic),
            ("subscription", &self.subscription),
        ] {
            if value.trim().is_empty() {
                return Err(SpoutError::Config(format!("{name} must not be empty")));
            }
        }
        if self.metrics_interval.is_zero() {
            return Err(SpoutError::Config(
                "metrics interval must be greater than zero".to_string(),
            ));
        }
        if self.backoff.initial_delay.is_zero() {
            return Err(SpoutError::Config(
                "backoff base interval must be greater than zero".to_string(),
            ));
        }
        if self.backoff.initial_delay > self.backoff.max_delay {
            return Err(SpoutError::Config(format!(
                "backoff base interval {:?} exceeds max interval {:?}",
                self.backoff.initial_delay, self.backoff.max_delay
            )));
        }
        Ok(())
    }

    /// `{component_id}-{task_id}`, used to tag logs and metrics
    pub fn spout_id(&self) -> String {
        format!("{}-{}", self.component_id, self.task_id)
    }

    /// Subscription this spout consumes from
    pub fn subscription(&self) -> Subscription {
        Subscription {
            service_url: self.service_url.clone(),
            topic: self.topic.clone(),
            subscription: self.subscription.clone(),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SpoutError::Config(format!("invalid {key}: {e}")))
}

fn millis(key: &str, value: &str) -> Result<Duration> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SpoutConfig::default();
        assert_eq!(config.receive_timeout, Duration::from_millis(100));
        assert_eq!(config.metrics_interval, Duration::from_secs(60));
        assert_eq!(config.max_failed_retries, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_empty_lookup_uses_defaults() {
        let config = SpoutConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.topic, "events");
        assert_eq!(config.spout_id(), "spout-0");
    }

    #[test]
    fn test_config_overrides() {
        let config = SpoutConfig::from_lookup(lookup_from(&[
            ("SPOUT_TOPIC", "orders"),
            ("SPOUT_SUBSCRIPTION", "billing"),
            ("SPOUT_COMPONENT_ID", "order-spout"),
            ("SPOUT_TASK_ID", "3"),
            ("SPOUT_MAX_FAILED_RETRIES", "5"),
            ("SPOUT_FAILED_RETRIES_TIMEOUT_MS", "30000"),
            ("SPOUT_BACKOFF_BASE_MS", "1000"),
            ("SPOUT_BACKOFF_MAX_MS", "30000"),
            ("SPOUT_SHARED_CONSUMER", "true"),
            ("SPOUT_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.spout_id(), "order-spout-3");
        assert_eq!(config.max_failed_retries, Some(5));
        assert_eq!(config.failed_retries_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.backoff.initial_delay, Duration::from_secs(1));
        assert!(config.shared_consumer);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.subscription().topic, "orders");
    }

    #[test]
    fn test_negative_limits_disable() {
        let config = SpoutConfig::from_lookup(lookup_from(&[
            ("SPOUT_MAX_FAILED_RETRIES", "-1"),
            ("SPOUT_FAILED_RETRIES_TIMEOUT_MS", "-1"),
        ]))
        .unwrap();

        assert_eq!(config.max_failed_retries, None);
        assert_eq!(config.failed_retries_timeout, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SpoutConfig::from_lookup(lookup_from(&[("SPOUT_TASK_ID", "abc")])).unwrap_err();
        assert!(err.to_string().contains("SPOUT_TASK_ID"));

        let err =
            SpoutConfig::from_lookup(lookup_from(&[("SPOUT_LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, SpoutError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_topic() {
        let config = SpoutConfig {
            topic: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = SpoutConfig {
            backoff: BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
