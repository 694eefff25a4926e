//! Verb-restricted SQL gateway and session reconciler over SQLite.
//!
//! # Intention
//!
//! - Let callers run their own parameterized statements, restricted per
//!   operation to one SQL verb and exactly one statement.
//! - Return rows of any shape as ordered, dynamically typed records.
//! - Keep exactly one session row per `sessionId`, however many writers race.
//!
//! # Architectural Boundaries
//!
//! - Only SQL execution, marshaling and session storage belong here.
//! - HTTP routing, listeners and secret loading live with the embedding
//!   server; it forwards a [`request::Method`] and body and relays the
//!   [`response::GatewayResponse`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod logging;
pub mod provider;
pub mod record;
pub mod request;
pub mod response;
pub mod service;
pub mod session;
pub mod value;

pub use config::{GatewayConfig, IdStrategy};
pub use error::{GatewayError, Result};
pub use gateway::{Operation, QueryGateway, Reply};
pub use guard::{is_allowed, Verb};
pub use provider::SqliteProvider;
pub use record::ResultRecord;
pub use request::{Method, QueryRequest};
pub use response::GatewayResponse;
pub use service::{Endpoint, GatewayService, Lifecycle};
pub use session::{SessionReconciler, SessionRecord, SessionTransition};
pub use value::Value;
