use serde::Deserialize;

use crate::aggregator::{AggregatorConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_STALENESS_MS};
use crate::channel::ChannelConfig;
use crate::estimation::{self, DEFAULT_CO2_INTENSITY};
use crate::producer::ProducerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub aggregator: AggregatorSection,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub producer: ProducerSection,
    #[serde(default)]
    pub emissions: EmissionsConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    pub tick_interval_ms: u64,
    /// A source not heard from for longer than this is purged.
    pub staleness_ms: u64,
    pub history_capacity: usize,
    pub mailbox_capacity: usize,
    /// How often to log pipeline stats at INFO level.
    pub stats_log_interval_secs: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            staleness_ms: DEFAULT_STALENESS_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            mailbox_capacity: 256,
            stats_log_interval_secs: 60,
        }
    }
}

/// `[producer]`: the component's own settings plus whether to attach one at all.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerSection {
    /// Attach a producer that observes this process.
    #[serde(default = "default_producer_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: ProducerConfig,
}

fn default_producer_enabled() -> bool {
    true
}

impl Default for ProducerSection {
    fn default() -> Self {
        Self {
            enabled: default_producer_enabled(),
            settings: ProducerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmissionsConfig {
    /// g CO2e per kWh; a persisted value from `store_path` overrides it.
    pub co2_intensity: f64,
    pub store_path: String,
}

impl Default for EmissionsConfig {
    fn default() -> Self {
        Self {
            co2_intensity: DEFAULT_CO2_INTENSITY,
            store_path: "data/settings.toml".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Max number of samples kept in the broadcast channel for /ws/samples (slow clients may lag).
    pub broadcast_capacity: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 60,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.aggregator.tick_interval_ms > 0,
            "aggregator.tick_interval_ms must be > 0, got {}",
            self.aggregator.tick_interval_ms
        );
        anyhow::ensure!(
            self.aggregator.staleness_ms > 0,
            "aggregator.staleness_ms must be > 0, got {}",
            self.aggregator.staleness_ms
        );
        anyhow::ensure!(
            self.aggregator.history_capacity > 0,
            "aggregator.history_capacity must be > 0, got {}",
            self.aggregator.history_capacity
        );
        anyhow::ensure!(
            self.aggregator.mailbox_capacity > 0,
            "aggregator.mailbox_capacity must be > 0, got {}",
            self.aggregator.mailbox_capacity
        );
        anyhow::ensure!(
            self.aggregator.stats_log_interval_secs > 0,
            "aggregator.stats_log_interval_secs must be > 0, got {}",
            self.aggregator.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.channel.request_timeout_ms > 0,
            "channel.request_timeout_ms must be > 0, got {}",
            self.channel.request_timeout_ms
        );
        anyhow::ensure!(
            self.channel.probe_timeout_ms > 0,
            "channel.probe_timeout_ms must be > 0, got {}",
            self.channel.probe_timeout_ms
        );
        anyhow::ensure!(
            self.channel.max_pending > 0,
            "channel.max_pending must be > 0, got {}",
            self.channel.max_pending
        );
        anyhow::ensure!(
            self.channel.base_backoff_ms <= self.channel.max_backoff_ms,
            "channel.base_backoff_ms ({}) must not exceed channel.max_backoff_ms ({})",
            self.channel.base_backoff_ms,
            self.channel.max_backoff_ms
        );
        anyhow::ensure!(
            self.producer.settings.sample_interval_ms > 0,
            "producer.sample_interval_ms must be > 0, got {}",
            self.producer.settings.sample_interval_ms
        );
        anyhow::ensure!(
            self.producer.settings.memory_interval_ms > 0,
            "producer.memory_interval_ms must be > 0, got {}",
            self.producer.settings.memory_interval_ms
        );
        anyhow::ensure!(
            !self.producer.settings.source_id.is_empty(),
            "producer.source_id must be non-empty"
        );
        anyhow::ensure!(
            estimation::is_valid_intensity(self.emissions.co2_intensity),
            "emissions.co2_intensity must be in [0, 1000], got {}",
            self.emissions.co2_intensity
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        Ok(())
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            history_capacity: self.aggregator.history_capacity,
            staleness_ms: self.aggregator.staleness_ms,
            co2_intensity: self.emissions.co2_intensity,
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        self.channel.clone()
    }

    pub fn producer_config(&self) -> ProducerConfig {
        self.producer.settings.clone()
    }
}
