//! Host facts published with the agent record

use crate::agent::AgentError;
use crate::environment::process;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub type Properties = BTreeMap<String, String>;

/// Collects a flat map of facts about this host
#[async_trait]
pub trait PropertySource: Send + Sync {
    async fn collect(&self) -> Result<Properties, AgentError>;
}

/// Facts the runtime knows without external tools
#[derive(Debug, Clone, Default)]
pub struct HostProperties;

#[async_trait]
impl PropertySource for HostProperties {
    async fn collect(&self) -> Result<Properties, AgentError> {
        let mut properties = Properties::new();
        properties.insert("os".to_string(), std::env::consts::OS.to_string());
        properties.insert("family".to_string(), std::env::consts::FAMILY.to_string());
        properties.insert("arch".to_string(), std::env::consts::ARCH.to_string());

        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        properties.insert("cpus".to_string(), cpus.to_string());

        match process::oneshot("hostname").await {
            Ok(hostname) => {
                properties.insert("hostname".to_string(), hostname);
            }
            Err(e) => debug!("hostname unavailable: {}", e),
        }

        Ok(properties)
    }
}

/// Facts reported by `facter --json`
#[derive(Debug, Clone, Default)]
pub struct FacterProperties;

#[async_trait]
impl PropertySource for FacterProperties {
    async fn collect(&self) -> Result<Properties, AgentError> {
        let output = process::oneshot("facter --json")
            .await
            .map_err(|e| AgentError::Properties(e.to_string()))?;
        let facts: Value =
            serde_json::from_str(&output).map_err(|e| AgentError::Properties(e.to_string()))?;
        Ok(flatten(&facts))
    }
}

/// Flatten nested objects into dotted keys; scalars become strings
pub fn flatten(value: &Value) -> Properties {
    let mut properties = Properties::new();
    flatten_into(&mut properties, None, value);
    properties
}

fn flatten_into(properties: &mut Properties, prefix: Option<&str>, value: &Value) {
    let key = |name: &str| match prefix {
        Some(prefix) => format!("{}.{}", prefix, name),
        None => name.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (name, child) in map {
                flatten_into(properties, Some(&key(name)), child);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(properties, Some(&key(&i.to_string())), child);
            }
        }
        Value::Null => {}
        Value::String(s) => {
            properties.insert(key_or_root(prefix), s.clone());
        }
        other => {
            properties.insert(key_or_root(prefix), other.to_string());
        }
    }
}

fn key_or_root(prefix: Option<&str>) -> String {
    prefix.unwrap_or("value").to_string()
}

/// A property source whose result is collected once per process
pub struct CachedProperties {
    source: Box<dyn PropertySource>,
    cache: OnceCell<Properties>,
}

impl CachedProperties {
    pub fn new(source: Box<dyn PropertySource>) -> Self {
        Self {
            source,
            cache: OnceCell::new(),
        }
    }

    /// Collect on first access; a failed collection yields no properties
    /// and is retried on the next access
    pub async fn get(&self) -> Properties {
        match self
            .cache
            .get_or_try_init(|| self.source.collect())
            .await
        {
            Ok(properties) => properties.clone(),
            Err(e) => {
                warn!("Could not collect host properties: {}", e);
                Properties::new()
            }
        }
    }
}

/// Fully qualified domain name of this host
pub async fn discover_fqdn() -> String {
    match process::oneshot("hostname -f").await {
        Ok(fqdn) if !fqdn.is_empty() => fqdn,
        _ => "localhost".to_string(),
    }
}
