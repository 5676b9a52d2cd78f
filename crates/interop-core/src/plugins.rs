use crate::compose::{Logic, Target};
use crate::components::Kwargs;
use crate::error::ConfigError;
use crate::models::{DataModel, ExecReq};
use std::collections::HashMap;

/// Late-bound implementations for MetaRemote dispatch, keyed by
/// `(namespace, name)`.
///
/// Each deployable unit registers its targets at startup; workers look them
/// up by name when a MetaRemote call arrives.
#[derive(Default, Clone, Debug)]
pub struct PluginRegistry {
    targets: HashMap<(String, String), Target>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a target under `namespace`, keyed by its own name.
    pub fn register(&mut self, namespace: &str, target: Target) -> Result<(), ConfigError> {
        let key = (namespace.to_string(), target.name().to_string());
        if self.targets.contains_key(&key) {
            return Err(ConfigError::DuplicatePlugin {
                namespace: key.0,
                name: key.1,
            });
        }
        tracing::info!("Registered plugin: {}:{}", key.0, key.1);
        self.targets.insert(key, target);
        Ok(())
    }

    pub fn register_logic<L: Logic + Default>(&mut self, namespace: &str) -> Result<(), ConfigError> {
        self.register(namespace, Target::from_logic(L::default))
    }

    pub fn register_function<In, Out, F>(
        &mut self,
        namespace: &str,
        name: &str,
        f: F,
    ) -> Result<(), ConfigError>
    where
        In: DataModel,
        Out: DataModel,
        F: Fn(In, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        self.register(namespace, Target::function(name, f))
    }

    pub fn get(&self, namespace: &str, name: &str) -> Result<Target, ConfigError> {
        self.targets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPlugin {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.targets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Lists all registered `namespace:name` keys.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .targets
            .keys()
            .map(|(namespace, name)| format!("{}:{}", namespace, name))
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BaseModel;

    fn identity(input: BaseModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<BaseModel> {
        Ok(input)
    }

    #[test]
    fn test_register_and_get() {
        let mut plugins = PluginRegistry::new();
        plugins.register_function("tools", "identity", identity).unwrap();

        let target = plugins.get("tools", "identity").unwrap();
        assert_eq!(target.name(), "identity");
        assert!(target.input().unwrap().is::<BaseModel>());
        assert!(plugins.contains("tools", "identity"));
        assert_eq!(plugins.list(), vec!["tools:identity".to_string()]);
    }

    #[test]
    fn test_duplicates_and_unknown() {
        let mut plugins = PluginRegistry::new();
        plugins.register_function("tools", "identity", identity).unwrap();
        assert!(matches!(
            plugins.register_function("tools", "identity", identity),
            Err(ConfigError::DuplicatePlugin { .. })
        ));
        plugins.register_function("other", "identity", identity).unwrap();

        assert!(matches!(
            plugins.get("tools", "missing"),
            Err(ConfigError::UnknownPlugin { name, .. }) if name == "missing"
        ));
    }
}
