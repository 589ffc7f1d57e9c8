use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    action::{Action, ActionRef},
    error::ConfigError,
};

/// Ordered set of named actions archetypes can refer to.
///
/// Registration order is preserved, which keeps reports and debug output stable.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: IndexMap<Arc<str>, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` under `name`. Names are unique.
    pub fn register(&mut self, name: impl Into<String>, action: impl Action + 'static) -> Result<&mut Self, ConfigError> {
        let name: Arc<str> = Arc::from(name.into());
        if self.actions.contains_key(&name) {
            return Err(ConfigError::DuplicateAction { name: name.to_string() });
        }
        self.actions.insert(name, Arc::new(action));
        Ok(self)
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, action: impl Action + 'static) -> Result<Self, ConfigError> {
        self.register(name, action)?;
        Ok(self)
    }

    /// Look up `name` and bind it to a static `repeat` parameter.
    pub fn resolve(&self, name: &str, repeat: u32) -> Option<ActionRef> {
        self.actions.get_key_value(name).map(|(name, action)| ActionRef {
            name: Arc::clone(name),
            action: Arc::clone(action),
            repeat,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(|k| &**k)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
