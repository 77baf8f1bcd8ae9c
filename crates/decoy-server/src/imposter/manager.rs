//! ImposterManager - lifecycle management for multiple imposters.
//!
//! Each imposter runs on its own port. Stubs are validated before a port is
//! opened or a stub list changes, so a rejected configuration leaves nothing
//! behind.

use super::core::{EngineContext, Imposter};
use super::handler::handle_imposter_request;
use super::types::{ImposterConfig, ImposterError, Stub};
use crate::canonical::{CanonicalRequest, CanonicalResponse};
use crate::config::EngineSettings;
use crate::error::StructuredError;
use crate::proxy::ProxyClient;
use crate::scripting::{
    validate_imposter_stubs, validate_is_response, validate_stub, InjectionHost, JsSandbox,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Manages the lifecycle of multiple imposters
pub struct ImposterManager {
    /// Active imposters by port
    imposters: RwLock<HashMap<u16, Arc<Imposter>>>,
    engine: Arc<EngineContext>,
}

impl ImposterManager {
    /// Create a manager running injections in a [`JsSandbox`].
    pub fn new(settings: EngineSettings) -> anyhow::Result<Self> {
        let sandbox = JsSandbox::new(settings.injection_timeout);
        Self::with_injection_host(settings, Arc::new(sandbox))
    }

    /// Create a manager with a custom injection host.
    pub fn with_injection_host(
        settings: EngineSettings,
        injection: Arc<dyn InjectionHost>,
    ) -> anyhow::Result<Self> {
        let proxy = ProxyClient::new(settings.proxy_timeout)?;
        Ok(Self {
            imposters: RwLock::new(HashMap::new()),
            engine: Arc::new(EngineContext {
                injection,
                proxy,
                settings,
            }),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.engine.settings
    }

    /// Validate, bind and start an imposter.
    /// Returns the bound port (OS-assigned when the config has none).
    pub async fn create_imposter(&self, config: ImposterConfig) -> Result<u16, ImposterError> {
        if config.protocol != "http" {
            return Err(ImposterError::InvalidProtocol(config.protocol.clone()));
        }
        if let Some(port) = config.port {
            if self.imposters.read().contains_key(&port) {
                return Err(ImposterError::PortInUse(port));
            }
        }

        self.validate(&config.stubs).await?;
        if let Some(default) = &config.default_response {
            validate_is_response(default)?;
        }

        let bind_host = config.host.clone().unwrap_or_else(|| "0.0.0.0".to_string());
        let requested = config.port.unwrap_or(0);
        let listener = TcpListener::bind((bind_host.as_str(), requested))
            .await
            .map_err(|e| ImposterError::BindError(requested, e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| ImposterError::BindError(requested, e.to_string()))?
            .port();

        info!("Imposter bound to {}:{}", bind_host, port);
        let mut imposter = Imposter::new(config, port, Arc::clone(&self.engine));

        let (shutdown_tx, _) = broadcast::channel(1);
        imposter.shutdown_tx = Some(shutdown_tx.clone());
        let imposter = Arc::new(imposter);

        {
            let mut imposters = self.imposters.write();
            if imposters.contains_key(&port) {
                return Err(ImposterError::PortInUse(port));
            }
            imposters.insert(port, Arc::clone(&imposter));
        }

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let imposter = Arc::clone(&imposter);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let imposter = Arc::clone(&imposter);
                                        async move {
                                            handle_imposter_request(req, imposter, addr).await
                                        }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection error on port {}: {}", port, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept error on port {}: {}", port, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Imposter on port {} shutting down", port);
                        break;
                    }
                }
            }
        });

        Ok(port)
    }

    async fn validate(&self, stubs: &[Stub]) -> Result<(), ImposterError> {
        validate_imposter_stubs(
            stubs,
            self.engine.injection.as_ref(),
            self.engine.settings.allow_injection,
        )
        .await?;
        Ok(())
    }

    /// Resolve a request against the imposter on `port` without going
    /// through its socket.
    pub async fn submit_request(
        &self,
        port: u16,
        request: CanonicalRequest,
    ) -> Result<CanonicalResponse, StructuredError> {
        let imposter = self.get_imposter(port)?;
        imposter.resolve(request).await.map_err(StructuredError::from)
    }

    /// Delete an imposter, returning its config with the stubs it had.
    pub async fn delete_imposter(&self, port: u16) -> Result<Arc<Imposter>, ImposterError> {
        let imposter = {
            let mut imposters = self.imposters.write();
            imposters
                .remove(&port)
                .ok_or(ImposterError::NotFound(port))?
        };

        if let Some(ref tx) = imposter.shutdown_tx {
            let _ = tx.send(());
        }

        info!("Imposter on port {} deleted", port);
        Ok(imposter)
    }

    /// Get an imposter by port
    pub fn get_imposter(&self, port: u16) -> Result<Arc<Imposter>, ImposterError> {
        let imposters = self.imposters.read();
        imposters
            .get(&port)
            .cloned()
            .ok_or(ImposterError::NotFound(port))
    }

    /// List all imposters, ordered by port
    pub fn list_imposters(&self) -> Vec<Arc<Imposter>> {
        let imposters = self.imposters.read();
        let mut list: Vec<Arc<Imposter>> = imposters.values().cloned().collect();
        list.sort_by_key(|imposter| imposter.port);
        list
    }

    /// Delete all imposters
    pub async fn delete_all(&self) -> Vec<Arc<Imposter>> {
        let ports: Vec<u16> = self.list_imposters().iter().map(|i| i.port).collect();

        let mut deleted = Vec::new();
        for port in ports {
            if let Ok(imposter) = self.delete_imposter(port).await {
                deleted.push(imposter);
            }
        }
        deleted
    }

    pub fn count(&self) -> usize {
        self.imposters.read().len()
    }

    /// Validate and add a stub at `index` (appended when `None`).
    pub async fn add_stub(
        &self,
        port: u16,
        stub: Stub,
        index: Option<usize>,
    ) -> Result<usize, ImposterError> {
        let imposter = self.get_imposter(port)?;
        let position = index.unwrap_or(imposter.stubs.len());
        validate_stub(
            &stub,
            position,
            self.engine.injection.as_ref(),
            self.engine.settings.allow_injection,
        )
        .await?;
        Ok(imposter.add_stub(stub, index))
    }

    /// Validate and replace every stub of an imposter.
    pub async fn replace_stubs(&self, port: u16, stubs: Vec<Stub>) -> Result<(), ImposterError> {
        let imposter = self.get_imposter(port)?;
        self.validate(&stubs).await?;
        imposter.replace_stubs(stubs);
        Ok(())
    }

    /// Delete a stub
    pub fn delete_stub(&self, port: u16, index: usize) -> Result<Stub, ImposterError> {
        let imposter = self.get_imposter(port)?;
        imposter
            .delete_stub(index)
            .ok_or(ImposterError::StubIndexOutOfBounds(index))
    }

    /// Stop every imposter.
    pub async fn shutdown(&self) {
        self.delete_all().await;
    }
}
