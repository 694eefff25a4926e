//! Verb-restricted execution of caller-supplied statements.
//!
//! Each [`Operation`] pins a transport method and a SQL verb. A call is
//! checked against both before the connection is touched, then the command
//! is prepared as exactly one statement, bound positionally and run.

use http::StatusCode;
use rusqlite::params_from_iter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::IdStrategy;
use crate::error::{GatewayError, Result};
use crate::guard::{is_allowed, Verb};
use crate::provider::{prepare_single, SqliteProvider};
use crate::record::{collect_records, column_names, last_record, ResultRecord};
use crate::request::{Method, QueryRequest};
use crate::response::GatewayResponse;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadMany,
    ReadOne,
    Insert,
    Update,
}

impl Operation {
    /// Reads travel as POST so the statement can ride in the body.
    pub fn expected_method(self) -> Method {
        match self {
            Operation::ReadMany | Operation::ReadOne | Operation::Insert => Method::POST,
            Operation::Update => Method::PUT,
        }
    }

    pub fn expected_verb(self) -> Verb {
        match self {
            Operation::ReadMany | Operation::ReadOne => Verb::Select,
            Operation::Insert => Verb::Insert,
            Operation::Update => Verb::Update,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::ReadMany => "read_many",
            Operation::ReadOne => "read_one",
            Operation::Insert => "insert",
            Operation::Update => "update",
        }
    }
}

/// Successful outcome of an operation, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Records(Vec<ResultRecord>),
    Record(ResultRecord),
    Identifier(Value),
    Updated(usize),
}

impl Reply {
    pub fn into_response(self) -> GatewayResponse {
        match self {
            Reply::Records(records) => GatewayResponse::json(StatusCode::OK, &records),
            Reply::Record(record) => GatewayResponse::json(StatusCode::OK, &record),
            Reply::Identifier(id) => GatewayResponse::json(StatusCode::OK, &id),
            Reply::Updated(_) => GatewayResponse::json_empty(StatusCode::OK),
        }
    }
}

pub struct QueryGateway {
    provider: Arc<SqliteProvider>,
}

impl QueryGateway {
    pub fn new(provider: Arc<SqliteProvider>) -> Self {
        Self { provider }
    }

    /// Runs `operation` and renders the outcome, success or failure.
    pub fn handle(&self, operation: Operation, method: Method, body: &[u8]) -> GatewayResponse {
        match self.dispatch(operation, method, body) {
            Ok(reply) => reply.into_response(),
            Err(err) => GatewayResponse::from_error(&err),
        }
    }

    pub fn dispatch(&self, operation: Operation, method: Method, body: &[u8]) -> Result<Reply> {
        let expected = operation.expected_method();
        if method != expected {
            return Err(GatewayError::MethodNotAllowed {
                expected,
                actual: method,
            });
        }
        if !self.provider.is_available() {
            return Err(GatewayError::ConnectionUnavailable);
        }
        let request = QueryRequest::from_slice(body)?;
        debug!(
            operation = operation.name(),
            params = request.parameters.len(),
            "dispatching query"
        );
        match operation {
            Operation::ReadMany => self.read_many(&request).map(Reply::Records),
            Operation::ReadOne => self.read_one(&request).map(Reply::Record),
            Operation::Insert => self.insert(&request).map(Reply::Identifier),
            Operation::Update => self.update(&request).map(Reply::Updated),
        }
    }

    /// All matching rows; an empty vec when nothing matches.
    pub fn read_many(&self, request: &QueryRequest) -> Result<Vec<ResultRecord>> {
        check_verb(request, Verb::Select)?;
        self.provider.with_connection(|conn| {
            let mut stmt = prepare_single(conn, &request.command_text)?;
            let columns = column_names(&stmt);
            let rows = stmt.query(params_from_iter(request.parameters.iter()))?;
            let records = collect_records(rows, &columns)?;
            Ok(records)
        })
    }

    /// The last matching row, or an empty record.
    pub fn read_one(&self, request: &QueryRequest) -> Result<ResultRecord> {
        check_verb(request, Verb::Select)?;
        self.provider.with_connection(|conn| {
            let mut stmt = prepare_single(conn, &request.command_text)?;
            let columns = column_names(&stmt);
            let rows = stmt.query(params_from_iter(request.parameters.iter()))?;
            let record = last_record(rows, &columns)?;
            Ok(record)
        })
    }

    /// Inserts and returns the generated identifier per the provider's
    /// [`IdStrategy`]. An insert that writes no row yields `Value::Null`.
    pub fn insert(&self, request: &QueryRequest) -> Result<Value> {
        check_verb(request, Verb::Insert)?;
        let strategy = self.provider.id_strategy();
        self.provider.with_connection(|conn| {
            let mut stmt = prepare_single(conn, &request.command_text)?;
            let params = params_from_iter(request.parameters.iter());
            let id = match strategy {
                // The rowid is per connection and survives from earlier calls.
                IdStrategy::LastInsertRowid => match stmt.execute(params)? {
                    0 => {
                        warn!("insert wrote no row");
                        Value::Null
                    }
                    _ => Value::Integer(conn.last_insert_rowid()),
                },
                IdStrategy::Returning => {
                    let mut rows = stmt.query(params)?;
                    let id = match rows.next()? {
                        Some(row) => Value::from(row.get_ref(0)?),
                        None => {
                            warn!("insert returned no row; is the RETURNING clause missing?");
                            Value::Null
                        }
                    };
                    while rows.next()?.is_some() {}
                    id
                }
            };
            info!(id = ?id, "row inserted");
            Ok(id)
        })
    }

    /// Applies the update and returns the number of rows it touched.
    pub fn update(&self, request: &QueryRequest) -> Result<usize> {
        check_verb(request, Verb::Update)?;
        self.provider.with_connection(|conn| {
            let mut stmt = prepare_single(conn, &request.command_text)?;
            let affected = stmt.execute(params_from_iter(request.parameters.iter()))?;
            info!(affected, "update applied");
            Ok(affected)
        })
    }
}

fn check_verb(request: &QueryRequest, expected: Verb) -> Result<()> {
    if is_allowed(&request.command_text, expected) {
        Ok(())
    } else {
        Err(GatewayError::VerbMismatch { expected })
    }
}
