use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_SEGMENTS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub materialization: MaterializationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Tuning for the membership evaluator.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// Contacts fetched per page from the contact store.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Size of the ordered match sample returned by dry runs and builds.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Batches evaluated concurrently within one scan.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_evaluation_timeout_ms")]
    pub evaluation_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MaterializationBackend {
    Local,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterializationConfig {
    #[serde(default = "default_backend")]
    pub backend: MaterializationBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_batch_size() -> usize {
    500
}
fn default_sample_size() -> usize {
    50
}
fn default_max_concurrent_batches() -> usize {
    4
}
fn default_evaluation_timeout_ms() -> u64 {
    30_000
}
fn default_backend() -> MaterializationBackend {
    MaterializationBackend::Local
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "segment:materialization".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sample_size: default_sample_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            evaluation_timeout_ms: default_evaluation_timeout_ms(),
        }
    }
}

impl Default for MaterializationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            segmentation: SegmentationConfig::default(),
            materialization: MaterializationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CAMPAIGN_SEGMENTS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let seg = &self.segmentation;
        if seg.batch_size == 0 {
            return Err(config::ConfigError::Message(
                "segmentation.batch_size must be greater than zero".into(),
            ));
        }
        if seg.evaluation_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "segmentation.evaluation_timeout_ms must be greater than zero".into(),
            ));
        }
        if seg.max_concurrent_batches == 0 {
            return Err(config::ConfigError::Message(
                "segmentation.max_concurrent_batches must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
