use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracefarm_core::{DEFAULT_CHUNK_SIZE, DEFAULT_TOLERANCE_SECS, MAX_CHUNK_SIZE};
use tracefarm_persistence::SceneStoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: NetworkConfig,
    pub scheduling: SchedulingConfig,
    pub persistence: PersistenceConfig,
    pub output: OutputConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    /// REST API and browser WebSocket endpoint
    pub http_port: u16,
    /// Length-prefixed JSON endpoint for native workers
    pub worker_port: Option<u16>,
    /// How long scene actors get to stop on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl NetworkConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Pixels per unit of work
    pub chunk_size: u32,
    /// Seconds a worker may hold a unit before it is handed out again
    pub tolerance_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub image_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub prometheus_port: u16,
    pub log_level: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        SchedulingConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

impl SchedulingConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.tolerance_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server: NetworkConfig {
                host: "0.0.0.0".to_string(),
                http_port: 1337,
                worker_port: Some(7337),
                shutdown_timeout_secs: default_shutdown_timeout_secs(),
            },
            scheduling: SchedulingConfig::default(),
            persistence: PersistenceConfig {
                data_dir: PathBuf::from("./data"),
            },
            output: OutputConfig {
                image_dir: PathBuf::from("./static/raytraced_images"),
            },
            monitoring: MonitoringConfig {
                prometheus_port: 9091,
                log_level: "info".to_string(),
            },
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduling.chunk_size == 0 || self.scheduling.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "scheduling.chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE,
                self.scheduling.chunk_size
            );
        }
        if self.scheduling.tolerance_secs == 0 {
            anyhow::bail!("scheduling.tolerance_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn to_scene_store_config(&self) -> SceneStoreConfig {
        SceneStoreConfig {
            data_dir: self.persistence.data_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.scheduling.chunk_size, 2500);
        assert_eq!(config.scheduling.tolerance(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  http_port: 8080
  worker_port: null
scheduling:
  chunk_size: 1000
  tolerance_secs: 5
persistence:
  data_dir: /tmp/tracefarm
output:
  image_dir: /tmp/tracefarm/images
monitoring:
  prometheus_port: 9100
  log_level: debug
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.worker_port, None);
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.scheduling.chunk_size, 1000);
        assert_eq!(config.to_scene_store_config().data_dir, PathBuf::from("/tmp/tracefarm"));
    }

    #[test]
    fn test_rejects_zero_chunk() {
        let mut config = ServerConfig::default();
        config.scheduling.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_chunk_too_large_for_a_frame() {
        let mut config = ServerConfig::default();
        config.scheduling.chunk_size = 100_000;
        assert!(config.validate().is_err());

        config.scheduling.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.validate().is_ok());
    }
}
