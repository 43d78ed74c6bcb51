//! Per-service kernel configuration, read once at startup.

use event_bus::consumer_retry::RetryConfig;
use event_bus::dlq_topic_for;
use std::env;
use std::time::Duration;

pub const DEFAULT_TTL_HOURS: i64 = 168;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 100;
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// What to do when a retry finds the original request still executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InFlightPolicy {
    /// Fail fast with `RequestInFlight`
    Reject,
    /// Poll for the completed response before giving up
    WaitAndRetry { attempts: u32, interval: Duration },
}

impl InFlightPolicy {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "reject" | "" => Ok(InFlightPolicy::Reject),
            "wait" => Ok(InFlightPolicy::WaitAndRetry {
                attempts: 5,
                interval: Duration::from_millis(200),
            }),
            other => Err(format!("IN_FLIGHT_POLICY must be 'reject' or 'wait', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub service_name: String,
    pub idempotency_ttl: chrono::Duration,
    pub event_dedup_ttl: chrono::Duration,
    pub consumer_poll_interval: Duration,
    pub outbox_flush_interval: Duration,
    pub outbox_flush_batch_size: usize,
    pub dlq_topic: String,
    pub schema_version: String,
    pub handler_retry: RetryConfig,
    pub in_flight_policy: InFlightPolicy,
    /// Flush the outbox at the start of every consumer tick
    pub flush_in_consumer_tick: bool,
}

impl KernelConfig {
    /// Defaults for everything but the service name
    pub fn new(service_name: impl Into<String>) -> Result<Self, String> {
        let service_name = service_name.into();
        let config = Self {
            dlq_topic: dlq_topic_for(service_name.trim()),
            service_name: service_name.trim().to_string(),
            idempotency_ttl: chrono::Duration::hours(DEFAULT_TTL_HOURS),
            event_dedup_ttl: chrono::Duration::hours(DEFAULT_TTL_HOURS),
            consumer_poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            outbox_flush_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            outbox_flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            handler_retry: RetryConfig::default(),
            in_flight_policy: InFlightPolicy::Reject,
            flush_in_consumer_tick: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from the environment (and `.env` if present)
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SERVICE_NAME` | required |
    /// | `IDEMPOTENCY_TTL_HOURS` | 168 |
    /// | `EVENT_DEDUP_TTL_HOURS` | 168 |
    /// | `CONSUMER_POLL_INTERVAL_MS` | 2000 |
    /// | `OUTBOX_FLUSH_INTERVAL_MS` | 2000 |
    /// | `OUTBOX_FLUSH_BATCH_SIZE` | 100 |
    /// | `DLQ_TOPIC` | `<service>.dlq` |
    /// | `HANDLER_MAX_ATTEMPTS` | 3 |
    /// | `IN_FLIGHT_POLICY` | `reject` |
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let service_name =
            env::var("SERVICE_NAME").map_err(|_| "SERVICE_NAME must be set".to_string())?;
        Self::load(service_name)
    }

    /// Like [`KernelConfig::from_env`], with `SERVICE_NAME` optional
    pub fn from_env_or(default_service: &str) -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| default_service.to_string());
        Self::load(service_name)
    }

    fn load(service_name: String) -> Result<Self, String> {
        let mut config = Self::new(service_name)?;

        config.idempotency_ttl = chrono::Duration::hours(parse_var(
            "IDEMPOTENCY_TTL_HOURS",
            DEFAULT_TTL_HOURS,
        )?);
        config.event_dedup_ttl = chrono::Duration::hours(parse_var(
            "EVENT_DEDUP_TTL_HOURS",
            DEFAULT_TTL_HOURS,
        )?);
        config.consumer_poll_interval = Duration::from_millis(parse_var(
            "CONSUMER_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);
        config.outbox_flush_interval = Duration::from_millis(parse_var(
            "OUTBOX_FLUSH_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);
        config.outbox_flush_batch_size =
            parse_var("OUTBOX_FLUSH_BATCH_SIZE", DEFAULT_FLUSH_BATCH_SIZE)?;
        if let Ok(topic) = env::var("DLQ_TOPIC") {
            config.dlq_topic = topic;
        }
        config.handler_retry.max_attempts =
            parse_var("HANDLER_MAX_ATTEMPTS", config.handler_retry.max_attempts)?;
        if let Ok(policy) = env::var("IN_FLIGHT_POLICY") {
            config.in_flight_policy = InFlightPolicy::parse(&policy)?;
        }
        if let Ok(flag) = env::var("FLUSH_IN_CONSUMER_TICK") {
            config.flush_in_consumer_tick = match flag.trim().to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(format!(
                        "FLUSH_IN_CONSUMER_TICK must be true or false, got '{}'",
                        other
                    ))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.service_name.is_empty() {
            return Err("service_name must be non-empty".to_string());
        }
        if self.idempotency_ttl <= chrono::Duration::zero() {
            return Err("idempotency_ttl must be positive".to_string());
        }
        if self.event_dedup_ttl <= chrono::Duration::zero() {
            return Err("event_dedup_ttl must be positive".to_string());
        }
        if self.consumer_poll_interval.is_zero() || self.outbox_flush_interval.is_zero() {
            return Err("poll intervals must be positive".to_string());
        }
        if self.dlq_topic.trim().is_empty() {
            return Err("dlq_topic must be non-empty".to_string());
        }
        if self.handler_retry.max_attempts == 0 {
            return Err("handler_retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    /// Effective flush batch; zero falls back to the default
    pub fn flush_batch(&self) -> usize {
        if self.outbox_flush_batch_size == 0 {
            DEFAULT_FLUSH_BATCH_SIZE
        } else {
            self.outbox_flush_batch_size
        }
    }

    /// Subject prefix for domain events: `<service>.events`
    pub fn domain_subject_prefix(&self) -> String {
        format!("{}.events", self.service_name)
    }

    /// Subject prefix for analytics events: `<service>.analytics`
    pub fn analytics_subject_prefix(&self) -> String {
        format!("{}.analytics", self.service_name)
    }

    pub fn with_idempotency_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn with_dedup_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.event_dedup_ttl = ttl;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.consumer_poll_interval = interval;
        self.outbox_flush_interval = interval;
        self
    }

    pub fn with_flush_batch_size(mut self, size: usize) -> Self {
        self.outbox_flush_batch_size = size;
        self
    }

    pub fn with_handler_retry(mut self, retry: RetryConfig) -> Self {
        self.handler_retry = retry;
        self
    }

    pub fn with_in_flight_policy(mut self, policy: InFlightPolicy) -> Self {
        self.in_flight_policy = policy;
        self
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} must be a valid number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}
