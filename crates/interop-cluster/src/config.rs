use anyhow::{Context, Result};
use interop_core::models::ExecReq;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Capacity of a local cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub num_cpus: u32,
    pub num_gpus: u32,
    /// Custom resources and their quantities, e.g. `{"accelerator": 2.0}`.
    pub resources: HashMap<String, f64>,
    pub memory: Option<f64>,
    pub object_store_memory: Option<f64>,
    pub address: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            num_cpus,
            num_gpus: 0,
            resources: HashMap::new(),
            memory: None,
            object_store_memory: None,
            address: None,
        }
    }
}

impl ClusterConfig {
    /// Defaults overridden by `INTEROP_*` variables. A `.env` file in the
    /// working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();
        if let Some(cpus) = env_var("INTEROP_NUM_CPUS")? {
            config.num_cpus = cpus;
        }
        if let Some(gpus) = env_var("INTEROP_NUM_GPUS")? {
            config.num_gpus = gpus;
        }
        config.memory = env_var("INTEROP_MEMORY")?.or(config.memory);
        config.object_store_memory =
            env_var("INTEROP_OBJECT_STORE_MEMORY")?.or(config.object_store_memory);
        if let Ok(address) = std::env::var("INTEROP_CLUSTER_ADDRESS") {
            config.address = Some(address);
        }
        tracing::debug!(?config, "Loaded cluster config from environment");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse cluster config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid cluster config {}", path.display()))
    }

    /// Sizes a cluster after the resource request carried by `exec_req`.
    /// Figures it leaves unset keep their defaults.
    pub fn from_exec_req(exec_req: &ExecReq) -> Self {
        let mut config = Self::default();
        if let Some(req) = &exec_req.compute_req {
            if let Some(cpus) = req.num_cpus {
                config.num_cpus = cpus;
            }
            if let Some(gpus) = req.num_gpus {
                config.num_gpus = gpus;
            }
            if let Some(resources) = &req.resources {
                config.resources = resources.clone();
            }
            config.memory = req.memory;
            config.object_store_memory = req.object_store_memory;
        }
        config.address = exec_req.address.clone();
        config
    }

    pub fn with_cpus(mut self, num_cpus: u32) -> Self {
        self.num_cpus = num_cpus;
        self
    }

    pub fn with_gpus(mut self, num_gpus: u32) -> Self {
        self.num_gpus = num_gpus;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, quantity: f64) -> Self {
        self.resources.insert(name.into(), quantity);
        self
    }
}

fn env_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_core::models::ResourceRequest;

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = ClusterConfig::from_yaml(
            r#"
num_cpus: 2
resources:
  accelerator: 1.5
"#,
        )
        .unwrap();
        assert_eq!(config.num_cpus, 2);
        assert_eq!(config.num_gpus, 0);
        assert_eq!(config.resources["accelerator"], 1.5);
        assert!(config.address.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(ClusterConfig::from_yaml("num_cpu: 2").is_err());
    }

    #[test]
    fn test_from_exec_req() {
        let exec_req = ExecReq {
            compute_req: Some(ResourceRequest {
                num_cpus: Some(3),
                object_store_memory: Some(1e9),
                ..Default::default()
            }),
            address: Some("auto".into()),
            ..Default::default()
        };
        let config = ClusterConfig::from_exec_req(&exec_req);
        assert_eq!(config.num_cpus, 3);
        assert_eq!(config.num_gpus, 0);
        assert_eq!(config.object_store_memory, Some(1e9));
        assert_eq!(config.address.as_deref(), Some("auto"));
    }

    #[test]
    fn test_env_var_parse_error_names_key() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::set_var("INTEROP_TEST_BAD_NUMBER", "many") };
        let err = env_var::<u32>("INTEROP_TEST_BAD_NUMBER").unwrap_err();
        assert!(err.to_string().contains("INTEROP_TEST_BAD_NUMBER"));
        assert_eq!(env_var::<u32>("INTEROP_TEST_UNSET_NUMBER").unwrap(), None);
    }
}
