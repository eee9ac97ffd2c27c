//! In-crate fake provider for engine tests.
//!
//! Resources are identified by their `name` input so tests can script
//! failures and assert on the order of provider calls.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ProviderError;
use crate::resource::{changed_keys, PropertyMap};

use super::plugin::{CreateResponse, DiffResponse, PartialState, PluginInfo, Provider};

/// A provider call, recorded at start and at completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Operation started.
    Start(String),
    /// Operation finished (successfully or not).
    End(String),
}

/// Scriptable provider recording every call.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    events: Arc<Mutex<Vec<Event>>>,
    fail: Arc<Mutex<HashSet<String>>>,
    partial_on_failure: bool,
    force_new: Vec<String>,
    delete_before_replace: bool,
    delay: Option<Duration>,
}

/// Builds inputs carrying the `name` the fake provider keys on.
pub fn named(name: &str, extra: Value) -> PropertyMap {
    let mut inputs: PropertyMap = serde_json::from_value(extra).unwrap_or_default();
    inputs.insert(String::from("name"), json!(name));
    inputs
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call for `target`, either a name or an `"op:name"` label.
    pub fn failing(self, target: &str) -> Self {
        self.fail.lock().unwrap().insert(target.to_string());
        self
    }

    pub fn heal(&self, target: &str) {
        self.fail.lock().unwrap().remove(target);
    }

    pub const fn with_partial_on_failure(mut self) -> Self {
        self.partial_on_failure = true;
        self
    }

    pub fn with_force_new(mut self, key: &str) -> Self {
        self.force_new.push(key.to_string());
        self
    }

    pub const fn with_delete_before_replace(mut self) -> Self {
        self.delete_before_replace = true;
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Completed operations in completion order, e.g. `"create:a"`.
    pub fn completed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::End(op) => Some(op),
                Event::Start(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    async fn call(&self, op: &str, props: &PropertyMap) -> Result<String, ProviderError> {
        let name = props
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        let label = format!("{op}:{name}");
        self.events.lock().unwrap().push(Event::Start(label.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = {
            let fail = self.fail.lock().unwrap();
            fail.contains(&name) || fail.contains(&label)
        };
        self.events.lock().unwrap().push(Event::End(label.clone()));

        if failed {
            Err(ProviderError::new(format!("{label} failed")))
        } else {
            Ok(name)
        }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn plugin(&self) -> PluginInfo {
        PluginInfo {
            name: String::from("fake"),
            version: String::from("0.0.1"),
        }
    }

    async fn diff(
        &self,
        _type_token: &str,
        _id: &str,
        old_inputs: &PropertyMap,
        _old_outputs: &PropertyMap,
        new_inputs: &PropertyMap,
    ) -> Result<DiffResponse, ProviderError> {
        let changed = changed_keys(old_inputs, new_inputs);
        if changed.is_empty() {
            return Ok(DiffResponse::Same);
        }
        let replace_keys: Vec<String> = changed
            .iter()
            .filter(|k| self.force_new.contains(*k))
            .cloned()
            .collect();
        if replace_keys.is_empty() {
            Ok(DiffResponse::Update { changed })
        } else {
            Ok(DiffResponse::Replace {
                replace_keys,
                delete_before_replace: self.delete_before_replace,
            })
        }
    }

    async fn create(
        &self,
        _type_token: &str,
        inputs: &PropertyMap,
    ) -> Result<CreateResponse, ProviderError> {
        match self.call("create", inputs).await {
            Ok(name) => Ok(CreateResponse {
                id: format!("{name}-id"),
                outputs: inputs.clone(),
            }),
            Err(err) if self.partial_on_failure => {
                let name = inputs.get("name").and_then(Value::as_str).unwrap_or("?");
                Err(err.with_partial(PartialState::created(
                    format!("{name}-partial"),
                    PropertyMap::new(),
                )))
            }
            Err(err) => Err(err),
        }
    }

    async fn update(
        &self,
        _type_token: &str,
        _id: &str,
        _old_inputs: &PropertyMap,
        new_inputs: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError> {
        self.call("update", new_inputs).await?;
        Ok(new_inputs.clone())
    }

    async fn delete(
        &self,
        _type_token: &str,
        _id: &str,
        outputs: &PropertyMap,
    ) -> Result<(), ProviderError> {
        self.call("delete", outputs).await.map(|_| ())
    }
}
