//! Namespace-scoped key resolution.

use crate::config::CacheConfig;
use tracing::trace;

/// Maps logical keys to physical store keys.
///
/// Every operation resolves its key exactly once, before the first store call.
#[derive(Debug, Clone, Default)]
pub struct KeyNamespacer {
    prefix: Option<String>,
    delimiter: String,
}

impl KeyNamespacer {
    /// Create a namespacer. A blank prefix disables namespacing.
    pub fn new(prefix: Option<&str>, delimiter: impl Into<String>) -> Self {
        let prefix = prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Self {
            prefix,
            delimiter: delimiter.into(),
        }
    }

    /// Create a namespacer from the client configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.namespace.as_deref(), config.namespace_delimiter.clone())
    }

    /// The configured prefix, if namespacing is active.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Resolve a logical key into the key sent to the store.
    pub fn resolve(&self, key: &str, namespace_enabled: bool) -> String {
        match &self.prefix {
            Some(prefix) if namespace_enabled => {
                let physical = format!("{}{}{}", prefix, self.delimiter, key);
                trace!(key, physical = %physical, "Applied key namespace");
                physical
            }
            _ => key.to_string(),
        }
    }
}
