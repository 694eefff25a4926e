//! Composition root: owns the connection's lifecycle and hands the one shared
//! provider to every component that needs it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{Operation, QueryGateway};
use crate::provider::SqliteProvider;
use crate::request::Method;
use crate::response::GatewayResponse;
use crate::session::SessionReconciler;

#[async_trait]
pub trait Lifecycle {
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
}

/// Every call the service answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ReadMany,
    ReadOne,
    Insert,
    Update,
    Session,
}

impl Endpoint {
    pub fn operation(self) -> Option<Operation> {
        match self {
            Endpoint::ReadMany => Some(Operation::ReadMany),
            Endpoint::ReadOne => Some(Operation::ReadOne),
            Endpoint::Insert => Some(Operation::Insert),
            Endpoint::Update => Some(Operation::Update),
            Endpoint::Session => None,
        }
    }
}

struct Components {
    provider: Arc<SqliteProvider>,
    gateway: QueryGateway,
    sessions: SessionReconciler,
}

pub struct GatewayService {
    config: GatewayConfig,
    components: Option<Components>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            components: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.components.is_some()
    }

    pub fn gateway(&self) -> Option<&QueryGateway> {
        self.components.as_ref().map(|c| &c.gateway)
    }

    pub fn sessions(&self) -> Option<&SessionReconciler> {
        self.components.as_ref().map(|c| &c.sessions)
    }

    /// Routes one call. Before `start` (or after `stop`) every endpoint
    /// answers as if the connection were unavailable.
    pub fn handle(&self, endpoint: Endpoint, method: Method, body: &[u8]) -> GatewayResponse {
        let Some(components) = &self.components else {
            return GatewayResponse::from_error(&GatewayError::ConnectionUnavailable);
        };
        match endpoint.operation() {
            Some(operation) => components.gateway.handle(operation, method, body),
            None => components.sessions.handle(method, body),
        }
    }

    pub fn ping(&self) -> GatewayResponse {
        let outcome = match &self.components {
            Some(components) => components.provider.ping(),
            None => Err(GatewayError::ConnectionUnavailable),
        };
        match outcome {
            Ok(()) => GatewayResponse::text(StatusCode::OK, "pong"),
            Err(err) => GatewayResponse::from_error(&err),
        }
    }
}

#[async_trait]
impl Lifecycle for GatewayService {
    async fn start(&mut self) -> Result<()> {
        if self.components.is_some() {
            return Ok(());
        }
        let db = &self.config.database;
        info!(path = %db.path, "starting gateway service");

        let provider = Arc::new(
            SqliteProvider::open(db)
                .with_context(|| format!("failed to open database at {}", db.path))?,
        );
        provider.ping().context("database did not answer ping")?;

        let sessions = SessionReconciler::new(provider.clone())
            .with_allowed_origin(self.config.session.allowed_origin.clone());
        if db.bootstrap_schema {
            sessions
                .bootstrap()
                .context("failed to create sessions schema")?;
        }

        self.components = Some(Components {
            gateway: QueryGateway::new(provider.clone()),
            sessions,
            provider,
        });
        info!("gateway service started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(components) = self.components.take() {
            components
                .provider
                .close()
                .context("failed to close database connection")?;
            info!("gateway service stopped");
        }
        Ok(())
    }
}
