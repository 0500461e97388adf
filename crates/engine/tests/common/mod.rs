#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eogate_engine::config::load_config_from_str;
use eogate_engine::{ConfiguredAuth, Gateway, Transport, TransportError};
use eogate_types::{ProviderQuery, RawProviderResponse};
use serde_json::{Value, json};

pub const FIXTURE: &str = include_str!("../fixtures/providers.yaml");

/// One scripted answer.
pub enum Step {
    Json(Value),
    Body(&'static str),
    Fail(TransportError),
    /// Never answers within any provider timeout.
    Hang,
    Echo(fn(&ProviderQuery) -> Value),
    /// Panics inside the transport, killing the worker task.
    Panic,
    /// Runs `action` before answering with the tree.
    Then(Box<dyn FnOnce() + Send>, Value),
}

/// In-memory transport answering from per-provider scripts and recording
/// every query it receives.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<ProviderQuery>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, provider: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(provider.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<ProviderQuery> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, provider: &str) -> Vec<ProviderQuery> {
        self.calls()
            .into_iter()
            .filter(|query| query.provider == provider)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, query: &ProviderQuery) -> Result<RawProviderResponse, TransportError> {
        self.calls.lock().unwrap().push(query.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&query.provider)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Json(tree)) => Ok(RawProviderResponse::from_json(200, tree)),
            Some(Step::Body(body)) => Ok(RawProviderResponse::from_bytes(200, body.as_bytes().to_vec())),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::connection("hang step woke up"))
            }
            Some(Step::Echo(respond)) => Ok(RawProviderResponse::from_json(200, respond(query))),
            Some(Step::Panic) => panic!("scripted transport panic for {}", query.provider),
            Some(Step::Then(action, tree)) => {
                action();
                Ok(RawProviderResponse::from_json(200, tree))
            }
            None => Err(TransportError::connection(format!("no scripted answer for {}", query.provider))),
        }
    }
}

pub fn gateway(transport: &Arc<MockTransport>) -> Gateway {
    let document = load_config_from_str(FIXTURE).unwrap();
    Gateway::new(document, transport.clone(), Arc::new(ConfiguredAuth))
}

pub fn features(ids: &[&str]) -> Value {
    json!({
        "features": ids
            .iter()
            .map(|id| json!({"id": id, "properties": {"productType": "S2MSI1C"}}))
            .collect::<Vec<_>>()
    })
}
