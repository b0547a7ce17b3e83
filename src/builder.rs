use std::{sync::Arc, time::Duration};

use tokio::runtime::{Builder, Runtime};

use crate::{
    Config, Engine, NodeflowError, Result,
    catalog::{Catalog, NodeKind},
    gateway::{GatewayRouter, Provider},
};

/// Assembles an [`Engine`] from a configuration, a node catalog and gateway providers.
pub struct EngineBuilder {
    config: Config,
    catalog: Catalog,
    gateway: Option<GatewayRouter>,
    providers: Vec<Arc<dyn Provider>>,
    default_chain: Option<Vec<String>>,
    rt: Option<Arc<Runtime>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            catalog: Catalog::builtin(),
            gateway: None,
            providers: Vec::new(),
            default_chain: None,
            rt: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.config.async_worker_thread_number = n;
        self
    }

    /// Replace the built-in catalog.
    pub fn catalog(
        mut self,
        catalog: Catalog,
    ) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register one more node kind.
    pub fn node(
        mut self,
        kind: Arc<dyn NodeKind>,
    ) -> Self {
        self.catalog.register(kind);
        self
    }

    /// Use a fully configured router instead of one built from the config.
    pub fn gateway(
        mut self,
        gateway: GatewayRouter,
    ) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn provider(
        mut self,
        provider: Arc<dyn Provider>,
    ) -> Self {
        self.providers.push(provider);
        self
    }

    /// Provider chain for requests that name none; overrides `[gateway] default_chain`.
    pub fn default_chain(
        mut self,
        chain: Vec<String>,
    ) -> Self {
        self.default_chain = Some(chain);
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let runtime = match self.rt {
            Some(rt) => rt,
            None => Arc::new(
                Builder::new_multi_thread()
                    .worker_threads(self.config.async_worker_thread_number.max(1).into())
                    .enable_all()
                    .build()
                    .map_err(|e| NodeflowError::Engine(format!("failed to build runtime: {}", e)))?,
            ),
        };

        let mut gateway = match self.gateway {
            Some(gateway) => gateway,
            None => GatewayRouter::new(Duration::from_millis(self.config.gateway.attempt_timeout_ms)).with_default_chain(self.config.gateway.default_chain.clone()),
        };
        for provider in self.providers {
            gateway.register(provider);
        }
        if let Some(chain) = self.default_chain {
            gateway = gateway.with_default_chain(chain);
        }

        Engine::new(self.config, self.catalog, gateway, runtime)
    }
}
