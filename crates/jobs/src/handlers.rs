//! Handler lookup by job kind.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::types::WorkUnit;

/// Job handler function type.
pub type JobHandler = Arc<dyn Fn(&JsonValue) -> anyhow::Result<JsonValue> + Send + Sync>;

/// Maps job kinds to handlers.
///
/// Lookup order for a kind such as `document.index`:
/// 1. exact match (`document.index`)
/// 2. category pattern (`document.*`); the longest matching prefix wins
/// 3. wildcard (`*`)
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a kind or pattern, replacing any previous one.
    pub fn register<F>(&mut self, pattern: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&JsonValue) -> anyhow::Result<JsonValue> + Send + Sync + 'static,
    {
        self.handlers.insert(pattern.into(), Arc::new(handler));
        self
    }

    /// Builder form of [`HandlerRegistry::register`].
    pub fn with<F>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&JsonValue) -> anyhow::Result<JsonValue> + Send + Sync + 'static,
    {
        self.register(pattern, handler);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered kinds and patterns, sorted.
    pub fn patterns(&self) -> Vec<&str> {
        let mut patterns: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        patterns.sort_unstable();
        patterns
    }

    /// Find the handler for `kind`.
    pub fn resolve(&self, kind: &str) -> Option<&JobHandler> {
        if let Some(h) = self.handlers.get(kind) {
            return Some(h);
        }

        // "document.*" matches "document.<anything>"
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = kind.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler);
        if category.is_some() {
            return category;
        }

        self.handlers.get("*")
    }

    /// Run `unit` through its handler.
    ///
    /// Handler errors and panics are turned into the error text recorded on
    /// the job; nothing unwinds past this call.
    pub fn execute(&self, unit: &WorkUnit) -> Result<JsonValue, String> {
        let handler = self
            .resolve(&unit.kind)
            .ok_or_else(|| format!("no handler registered for job kind: {}", unit.kind))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&unit.payload))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(panic) => Err(format!("job panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("patterns", &self.patterns())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
