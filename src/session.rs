//! Find-or-create-or-update of tracker sessions keyed by `sessionId`.
//!
//! The lookup and the write run inside one IMMEDIATE transaction and the write
//! itself is an `INSERT … ON CONFLICT(sessionId) DO UPDATE`, so concurrent first
//! sightings of a key, from this process or another one sharing the file, end
//! in exactly one row.

use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use http::StatusCode;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::provider::SqliteProvider;
use crate::request::Method;
use crate::response::GatewayResponse;
use crate::value::Value;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sessionId TEXT NOT NULL,
    lastActivityTime TEXT,
    userId TEXT,
    userPath TEXT,
    sessionDuration INTEGER,
    userAgent TEXT,
    referrer TEXT,
    token TEXT,
    startTime TEXT,
    screenResolution TEXT,
    language TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_session_id ON sessions (sessionId);
"#;

const LOOKUP: &str = "SELECT id FROM sessions WHERE sessionId = ?1";

const SELECT_ONE: &str = "SELECT sessionId, lastActivityTime, userId, userPath, sessionDuration,
    userAgent, referrer, token, startTime, screenResolution, language
    FROM sessions WHERE sessionId = ?1";

const UPSERT: &str = "INSERT INTO sessions (
        sessionId, lastActivityTime, userId, userPath, sessionDuration,
        userAgent, referrer, token, startTime, screenResolution, language
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(sessionId) DO UPDATE SET
        lastActivityTime = excluded.lastActivityTime,
        userId = excluded.userId,
        userPath = excluded.userPath,
        sessionDuration = excluded.sessionDuration,
        userAgent = excluded.userAgent,
        referrer = excluded.referrer,
        token = excluded.token,
        startTime = excluded.startTime,
        screenResolution = excluded.screenResolution,
        language = excluded.language";

const SESSION_KEY: &str = "sessionId";

/// Payload keys for each mutable field, in storage column order. The second
/// key, where present, is the name older trackers send.
const PAYLOAD_KEYS: [&[&str]; 10] = [
    &["lastActivityTime"],
    &["userId"],
    &["path", "userPath"],
    &["durationSeconds", "sessionDuration"],
    &["userAgent"],
    &["referrer"],
    &["authToken", "token"],
    &["startTime"],
    &["screenResolution"],
    &["language"],
];

/// Creates the sessions table and its unique key when missing.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub last_activity_time: Value,
    pub user_id: Value,
    pub path: Value,
    pub duration_seconds: Value,
    pub user_agent: Value,
    pub referrer: Value,
    pub auth_token: Value,
    pub start_time: Value,
    pub screen_resolution: Value,
    pub language: Value,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Builds a record from a tracker payload.
    ///
    /// `sessionId` must be a JSON string; other fields must be scalars.
    /// Keys outside the session layout are ignored.
    pub fn from_payload(body: &[u8]) -> Result<Self> {
        let payload: Map<String, JsonValue> = serde_json::from_slice(body)?;
        let session_id = match payload.get(SESSION_KEY) {
            Some(JsonValue::String(id)) => id.clone(),
            _ => return Err(GatewayError::SessionKeyMissing),
        };

        let mut record = Self::new(session_id);
        for (keys, slot) in PAYLOAD_KEYS.iter().zip(record.fields_mut()) {
            let Some((key, json)) = keys
                .iter()
                .find_map(|key| payload.get(*key).map(|json| (*key, json)))
            else {
                continue;
            };
            *slot = Value::try_from(json.clone())
                .map_err(|err| GatewayError::PayloadDecode(format!("{key}: {err}")))?;
        }

        let ignored: Vec<&str> = payload
            .keys()
            .map(String::as_str)
            .filter(|key| *key != SESSION_KEY)
            .filter(|key| !PAYLOAD_KEYS.iter().any(|keys| keys.contains(key)))
            .collect();
        if !ignored.is_empty() {
            debug!(?ignored, "ignoring unknown session fields");
        }
        Ok(record)
    }

    fn fields(&self) -> [&Value; 10] {
        [
            &self.last_activity_time,
            &self.user_id,
            &self.path,
            &self.duration_seconds,
            &self.user_agent,
            &self.referrer,
            &self.auth_token,
            &self.start_time,
            &self.screen_resolution,
            &self.language,
        ]
    }

    fn fields_mut(&mut self) -> [&mut Value; 10] {
        [
            &mut self.last_activity_time,
            &mut self.user_id,
            &mut self.path,
            &mut self.duration_seconds,
            &mut self.user_agent,
            &mut self.referrer,
            &mut self.auth_token,
            &mut self.start_time,
            &mut self.screen_resolution,
            &mut self.language,
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut record = Self::new(row.get::<_, String>(0)?);
        for (idx, slot) in record.fields_mut().into_iter().enumerate() {
            *slot = Value::from(row.get_ref(idx + 1)?);
        }
        Ok(record)
    }
}

/// Which edge of the absent/present state machine a write took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Created,
    Updated,
}

pub struct SessionReconciler {
    provider: Arc<SqliteProvider>,
    allowed_origin: Option<HeaderValue>,
}

impl SessionReconciler {
    pub fn new(provider: Arc<SqliteProvider>) -> Self {
        Self {
            provider,
            allowed_origin: None,
        }
    }

    /// An origin that is not a valid header value is dropped with a warning.
    pub fn with_allowed_origin(mut self, origin: Option<String>) -> Self {
        self.allowed_origin = origin.and_then(|origin| match HeaderValue::try_from(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "ignoring invalid allowed origin");
                None
            }
        });
        self
    }

    pub fn bootstrap(&self) -> Result<()> {
        self.provider.with_connection(|conn| ensure_schema(conn))
    }

    /// Answers preflight, rejects anything but POST, reconciles otherwise.
    /// CORS headers are set on every response.
    pub fn handle(&self, method: Method, body: &[u8]) -> GatewayResponse {
        let resp = if method == Method::OPTIONS {
            GatewayResponse::empty(StatusCode::OK)
        } else if method == Method::POST {
            match self.reconcile(body) {
                Ok(_) => GatewayResponse::json(StatusCode::OK, &json!({ "success": true })),
                Err(err) => GatewayResponse::from_error(&err),
            }
        } else {
            GatewayResponse::from_error(&GatewayError::MethodNotAllowed {
                expected: Method::POST,
                actual: method,
            })
        };
        self.with_cors(resp)
    }

    pub fn reconcile(&self, body: &[u8]) -> Result<SessionTransition> {
        if !self.provider.is_available() {
            return Err(GatewayError::ConnectionUnavailable);
        }
        let record = SessionRecord::from_payload(body)?;
        self.upsert(&record)
    }

    /// Inserts the record if its key is new, otherwise overwrites every
    /// mutable field of the stored row.
    pub fn upsert(&self, record: &SessionRecord) -> Result<SessionTransition> {
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(11);
        params.push(&record.session_id);
        params.extend(record.fields().into_iter().map(|value| value as &dyn ToSql));

        let transition = self.provider.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<i64> = tx
                .query_row(LOOKUP, [&record.session_id], |row| row.get(0))
                .optional()?;
            tx.execute(UPSERT, params.as_slice())?;
            tx.commit()?;
            Ok(match existing {
                Some(_) => SessionTransition::Updated,
                None => SessionTransition::Created,
            })
        })?;
        info!(session_id = %record.session_id, ?transition, "session reconciled");
        Ok(transition)
    }

    /// Current stored state of a session; never cached.
    pub fn find(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.provider.with_connection(|conn| {
            let record = conn
                .query_row(SELECT_ONE, [session_id], SessionRecord::from_row)
                .optional()?;
            Ok(record)
        })
    }

    fn with_cors(&self, resp: GatewayResponse) -> GatewayResponse {
        let resp = match &self.allowed_origin {
            Some(origin) => resp.with_header(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone()),
            None => resp,
        };
        resp.with_header(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST"))
            .with_header(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_current_and_legacy_keys() {
        let record = SessionRecord::from_payload(
            br#"{"sessionId":"s1","path":"/home","sessionDuration":42,"token":"t","extra":1}"#,
        )
        .unwrap();
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.path, Value::Text("/home".into()));
        assert_eq!(record.duration_seconds, Value::Integer(42));
        assert_eq!(record.auth_token, Value::Text("t".into()));
        assert_eq!(record.user_agent, Value::Null);
    }

    #[test]
    fn current_key_wins_over_legacy_key() {
        let record =
            SessionRecord::from_payload(br#"{"sessionId":"s1","userPath":"/old","path":"/new"}"#)
                .unwrap();
        assert_eq!(record.path, Value::Text("/new".into()));
    }

    #[test]
    fn session_id_must_be_a_string() {
        let bodies: [&[u8]; 3] = [
            br#"{"userAgent":"A"}"#,
            br#"{"sessionId":7}"#,
            br#"{"sessionId":null}"#,
        ];
        for body in bodies {
            assert!(matches!(
                SessionRecord::from_payload(body),
                Err(GatewayError::SessionKeyMissing)
            ));
        }
    }

    #[test]
    fn nested_field_values_are_rejected() {
        let err = SessionRecord::from_payload(br#"{"sessionId":"s1","language":["en"]}"#)
            .unwrap_err();
        assert!(matches!(err, GatewayError::PayloadDecode(msg) if msg.starts_with("language")));
    }

    #[test]
    fn non_object_payload_is_a_decode_failure() {
        assert!(matches!(
            SessionRecord::from_payload(b"[1,2]"),
            Err(GatewayError::PayloadDecode(_))
        ));
        assert!(matches!(
            SessionRecord::from_payload(b"{invalid json}"),
            Err(GatewayError::PayloadDecode(_))
        ));
    }

    #[test]
    fn upsert_creates_then_updates() {
        let provider = Arc::new(SqliteProvider::open_in_memory().unwrap());
        let reconciler = SessionReconciler::new(provider);
        reconciler.bootstrap().unwrap();

        let mut record = SessionRecord::new("abc");
        record.user_agent = Value::from("A");
        assert_eq!(reconciler.upsert(&record).unwrap(), SessionTransition::Created);
        record.user_agent = Value::from("B");
        assert_eq!(reconciler.upsert(&record).unwrap(), SessionTransition::Updated);

        let stored = reconciler.find("abc").unwrap().unwrap();
        assert_eq!(stored.user_agent, Value::Text("B".into()));
        assert!(reconciler.find("missing").unwrap().is_none());
    }
}
