use std::collections::HashMap;

use crate::error::SwitchyardError;
use crate::job::{BoxedHandler, JobHandler};

pub type HandlerFactory = fn(serde_json::Value) -> Result<BoxedHandler, SwitchyardError>;

/// Maps envelope `class` identifiers to handler factories.
///
/// The `class` field carried by an envelope is an opaque identifier, not a
/// language symbol: every handler a deployment can execute is registered
/// here explicitly at startup. Callers with their own resolution scheme can
/// register arbitrary factory functions.
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFactory>,
}

/// Builds a handler by deserializing the job args into `T`.
///
/// A null args value is treated as an empty mapping so that handlers without
/// fields can be enqueued argument-free.
pub fn handler_factory<T>(args: serde_json::Value) -> Result<BoxedHandler, SwitchyardError>
where
    T: JobHandler + serde::de::DeserializeOwned + 'static,
{
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args
    };
    let handler: T = serde_json::from_value(args)?;
    Ok(Box::new(handler))
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T>(&mut self, class: impl Into<String>) -> &mut Self
    where
        T: JobHandler + serde::de::DeserializeOwned + 'static,
    {
        self.handlers.insert(class.into(), handler_factory::<T>);
        self
    }

    pub fn register_factory(&mut self, class: impl Into<String>, factory: HandlerFactory) {
        self.handlers.insert(class.into(), factory);
    }

    pub fn has(&self, class: &str) -> bool {
        self.handlers.contains_key(class)
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn build(
        &self,
        class: &str,
        args: serde_json::Value,
    ) -> Result<BoxedHandler, SwitchyardError> {
        let factory = self
            .handlers
            .get(class)
            .ok_or_else(|| SwitchyardError::NotRegistered(class.to_string()))?;
        factory(args)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
