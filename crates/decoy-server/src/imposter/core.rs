//! Core Imposter struct: stub resolution for one port.

use super::response::{recorded_response, render_injected, render_is};
use super::stubs::{Recorded, StubId, StubList};
use super::types::{ImposterConfig, ProxyResponse, RecordedRequest, ResolveError, Stub, StubResponse};
use crate::canonical::{CanonicalRequest, CanonicalResponse};
use crate::config::EngineSettings;
use crate::predicate::{synthesize, PredicateEvaluator};
use crate::proxy::ProxyClient;
use crate::scripting::{new_injection_state, InjectionHost, InjectionState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Collaborators shared by every imposter of a manager.
pub struct EngineContext {
    pub injection: Arc<dyn InjectionHost>,
    pub proxy: ProxyClient,
    pub settings: EngineSettings,
}

/// Runtime state of an imposter
pub struct Imposter {
    /// Creation config with the bound port filled in. Live stubs are in `stubs`.
    pub config: ImposterConfig,
    pub port: u16,
    pub stubs: StubList,
    /// Shared by every injected response function of this imposter.
    pub state: InjectionState,
    pub recorded_requests: RwLock<Vec<RecordedRequest>>,
    pub request_count: AtomicU64,
    pub shutdown_tx: Option<broadcast::Sender<()>>,
    engine: Arc<EngineContext>,
    evaluator: PredicateEvaluator,
}

impl Imposter {
    /// Create a new imposter from config
    pub fn new(mut config: ImposterConfig, port: u16, engine: Arc<EngineContext>) -> Self {
        let stubs = std::mem::take(&mut config.stubs);
        config.port = Some(port);
        let evaluator = PredicateEvaluator::new(Arc::clone(&engine.injection));

        Self {
            config,
            port,
            stubs: StubList::new(stubs),
            state: new_injection_state(),
            recorded_requests: RwLock::new(Vec::new()),
            request_count: AtomicU64::new(0),
            shutdown_tx: None,
            engine,
            evaluator,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn protocol(&self) -> &str {
        &self.config.protocol
    }

    /// Creation config with the current stubs, as reported by the admin API.
    pub fn current_config(&self) -> ImposterConfig {
        ImposterConfig {
            stubs: self.stubs.stubs(),
            ..self.config.clone()
        }
    }

    pub fn get_recorded_requests(&self) -> Vec<RecordedRequest> {
        self.recorded_requests.read().clone()
    }

    pub fn add_stub(&self, stub: Stub, index: Option<usize>) -> usize {
        self.stubs.insert(index, stub)
    }

    pub fn replace_stubs(&self, stubs: Vec<Stub>) {
        self.stubs.replace(stubs);
    }

    pub fn delete_stub(&self, index: usize) -> Option<Stub> {
        self.stubs.remove(index)
    }

    /// Produce the response for one request.
    ///
    /// Candidates are taken from a snapshot of the stub list, so a stub
    /// recorded while this request is in flight never answers it.
    pub async fn resolve(
        &self,
        request: CanonicalRequest,
    ) -> Result<CanonicalResponse, ResolveError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if self.config.record_requests {
            self.recorded_requests
                .write()
                .push(RecordedRequest::now(request.clone()));
        }

        for candidate in self.stubs.snapshot() {
            if !self
                .evaluator
                .all_match(&candidate.predicates, &request)
                .await
            {
                continue;
            }
            // removed by a concurrent admin call since the snapshot
            let Some(response) = self.stubs.next_response(candidate.id) else {
                continue;
            };

            debug!(
                "Imposter {}: {} {} matched stub {}",
                self.port, request.method, request.path, candidate.id
            );
            let mut resolved = self.generate(candidate.id, &response, &request).await?;
            resolved.proxy_resolution = None;
            if let Some(ms) = resolved.wait_ms.filter(|ms| *ms > 0) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            return Ok(resolved);
        }

        debug!(
            "Imposter {}: no stub matched {} {}",
            self.port, request.method, request.path
        );
        match &self.config.default_response {
            Some(default) => render_is(default, None),
            None => Ok(CanonicalResponse::new(200)),
        }
    }

    async fn generate(
        &self,
        stub_id: StubId,
        response: &StubResponse,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse, ResolveError> {
        match response {
            StubResponse::Is { is, behaviors } => render_is(is, behaviors.as_ref()),
            StubResponse::Inject { inject } => {
                let value = self
                    .engine
                    .injection
                    .compute_response(inject, request, &self.state)
                    .await
                    .map_err(|error| ResolveError::Injection {
                        script: inject.clone(),
                        error,
                    })?;
                render_injected(value)
            }
            StubResponse::Proxy { proxy } => {
                let origin = self
                    .engine
                    .proxy
                    .forward(request, &proxy.to, &proxy.inject_headers)
                    .await?;
                self.record(stub_id, proxy, request, &origin);
                Ok(origin)
            }
        }
    }

    fn record(
        &self,
        proxy_id: StubId,
        proxy: &ProxyResponse,
        request: &CanonicalRequest,
        origin: &CanonicalResponse,
    ) {
        let predicates = synthesize(request, &proxy.predicate_generators);
        let response = recorded_response(origin, proxy.add_wait_behavior);
        match self.stubs.record(proxy_id, proxy.mode, predicates, response) {
            Recorded::Dropped => warn!(
                "Imposter {}: proxy stub removed before {} {} could be recorded",
                self.port, request.method, request.path
            ),
            outcome => debug!("Imposter {}: recorded proxy response ({:?})", self.port, outcome),
        }
    }
}
