use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{NodeflowError, Result, runtime::ExecutionOptions};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// number of async worker threads, range [1, 32768), defaults to 16
    pub async_worker_thread_number: u16,
    /// scheduling limits
    pub engine: EngineConfig,
    /// inference gateway settings
    pub gateway: GatewayConfig,
    /// store config
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// concurrent node attempts per execution
    pub max_concurrency: usize,
    /// concurrent node attempts across every execution, unbounded when unset
    pub global_max_concurrency: Option<usize>,
    /// time in-flight nodes get to finish after a cancel or stop
    pub cancel_grace_ms: u64,
    /// timeout for nodes that do not set one
    pub default_node_timeout_ms: Option<u64>,
    /// loop bound for loop nodes that do not set one
    pub loop_max_iterations: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// per-provider attempt timeout
    pub attempt_timeout_ms: u64,
    /// provider chain used when a request names none
    pub default_chain: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// store type
    pub store_type: StoreType,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    #[default]
    Mem,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_worker_thread_number: 16,
            engine: EngineConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            global_max_concurrency: None,
            cancel_grace_ms: 5000,
            default_node_timeout_ms: None,
            loop_max_iterations: 1000,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30000,
            default_chain: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub(crate) fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
            default_timeout: self.default_node_timeout_ms.map(Duration::from_millis),
            loop_max_iterations: self.loop_max_iterations,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| NodeflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        if config.async_worker_thread_number == 0 {
            return Err(NodeflowError::Config("async_worker_thread_number must be at least 1".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        async_worker_thread_number = 10

        [engine]
        max_concurrency = 4
        global_max_concurrency = 32
        default_node_timeout_ms = 2000

        [gateway]
        default_chain = ["local", "hosted"]

        [store]
        store_type = "mem"
        "#;
        let config = Config::load_from_str(toml_str).unwrap();
        assert_eq!(config.async_worker_thread_number, 10);
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.engine.global_max_concurrency, Some(32));
        assert_eq!(config.engine.cancel_grace_ms, 5000);
        assert_eq!(config.engine.loop_max_iterations, 1000);
        assert_eq!(config.gateway.attempt_timeout_ms, 30000);
        assert_eq!(config.gateway.default_chain, vec!["local", "hosted"]);
        assert_eq!(config.store.store_type, StoreType::Mem);

        let options = config.engine.execution_options();
        assert_eq!(options.default_timeout, Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_config_defaults() {
        assert_eq!(Config::load_from_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_config_errors() {
        assert!(matches!(Config::load_from_str("async_worker_thread_number = \"many\""), Err(NodeflowError::Config(_))));
        assert!(Config::load_from_str("async_worker_thread_number = 0").is_err());
        assert!(Config::load_from_str("[store]\nstore_type = \"postgres\"").is_err());
        assert!(Config::create("/nonexistent/nodeflow.toml").is_err());
    }
}
