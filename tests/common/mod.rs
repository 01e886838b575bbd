//! Shared fixtures for integration tests: a scripted `services.http`
//! capability and a couple of flow-document builders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use flowspire::action::http::{HttpCallError, HttpRequest, HttpResponse, HttpService};
use flowspire::compiler::{compile, CompiledFlow, FlowDocument};
use flowspire::registry::{Capability, CapabilityRegistry, Namespace};

/// One scripted outcome for [`ScriptedHttpService`].
#[derive(Clone)]
pub enum Outcome {
    Ok(Value),
    Status(u16),
    Network,
}

/// A `services.http` capability driven by a fixed script of outcomes. Once
/// the script is exhausted the last entry repeats, so tests don't need to
/// pad it out to the exact retry count.
pub struct ScriptedHttpService {
    script: Mutex<Vec<Outcome>>,
    calls: AtomicUsize,
}

impl ScriptedHttpService {
    #[must_use]
    pub fn new(script: Vec<Outcome>) -> Self {
        assert!(!script.is_empty(), "script must have at least one outcome");
        Self { script: Mutex::new(script), calls: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpService for ScriptedHttpService {
    async fn call(&self, _request: HttpRequest) -> Result<HttpResponse, HttpCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        };
        match outcome {
            Outcome::Ok(body) => Ok(HttpResponse { status: 200, body }),
            Outcome::Status(status) => Err(HttpCallError::Status(status)),
            Outcome::Network => Err(HttpCallError::Network("connection reset".to_string())),
        }
    }
}

/// Builds a registry with `services.http` bound to `service`.
#[must_use]
pub fn registry_with_http(service: Arc<ScriptedHttpService>) -> CapabilityRegistry {
    let registry = CapabilityRegistry::new();
    let service: Arc<dyn HttpService> = service;
    registry
        .register(Namespace::Services, "http", Arc::new(Capability(service)), None)
        .unwrap();
    registry
}

/// Parses and compiles `doc_json` against `registry`, panicking on failure —
/// tests only ever feed this known-valid documents.
#[must_use]
pub fn compile_flow(doc_json: Value, registry: &CapabilityRegistry) -> CompiledFlow {
    let doc: FlowDocument = serde_json::from_value(doc_json).unwrap();
    compile(&doc, false, registry).unwrap()
}
