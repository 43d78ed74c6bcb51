use mutation_kernel::KernelConfig;
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub kernel: KernelConfig,
    pub bus_type: BusType,
    pub nats_url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Subject pattern the eligibility consumer subscribes to
    pub inbound_subject: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let kernel = KernelConfig::from_env_or(crate::SERVICE_NAME)?;
        let bus_type = BusType::from_env();

        let nats_url = match bus_type {
            BusType::Nats => Some(
                env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            ),
            BusType::InMemory => None,
        };

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let inbound_subject = env::var("INBOUND_SUBJECT")
            .unwrap_or_else(|_| "*.events.reward.payout_eligible".to_string());

        Ok(Self {
            kernel,
            bus_type,
            nats_url,
            host,
            port,
            inbound_subject,
        })
    }
}
