use http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use tempfile::NamedTempFile;

use sql_gateway::config::DatabaseConfig;
use sql_gateway::{
    Method, Operation, QueryGateway, QueryRequest, SessionReconciler, SessionTransition,
    SqliteProvider, Value,
};

fn create_reconciler(config: &DatabaseConfig) -> (Arc<SqliteProvider>, SessionReconciler) {
    let provider = Arc::new(SqliteProvider::open(config).unwrap());
    let reconciler = SessionReconciler::new(provider.clone())
        .with_allowed_origin(Some("https://example.com".to_string()));
    reconciler.bootstrap().unwrap();
    (provider, reconciler)
}

fn create_test_reconciler() -> (Arc<SqliteProvider>, SessionReconciler) {
    create_reconciler(&DatabaseConfig::in_memory())
}

// Counts through the generic gateway, the way a dashboard would
fn sessions_with_id(provider: &Arc<SqliteProvider>, session_id: &str) -> i64 {
    let gateway = QueryGateway::new(provider.clone());
    let record = gateway
        .read_one(
            &QueryRequest::new("SELECT COUNT(*) AS n FROM sessions WHERE sessionId = ?")
                .with_param(session_id),
        )
        .unwrap();
    record.get("n").and_then(Value::as_i64).unwrap()
}

fn total_sessions(provider: &Arc<SqliteProvider>) -> i64 {
    let gateway = QueryGateway::new(provider.clone());
    let body = json!({"commandText": "SELECT COUNT(*) AS n FROM sessions"}).to_string();
    let resp = gateway.handle(Operation::ReadOne, Method::POST, body.as_bytes());
    let parsed: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    parsed["n"].as_i64().unwrap()
}

fn post(reconciler: &SessionReconciler, body: serde_json::Value) -> StatusCode {
    reconciler
        .handle(Method::POST, body.to_string().as_bytes())
        .status
}

#[test]
fn first_sighting_creates_then_later_sightings_update() {
    let (provider, reconciler) = create_test_reconciler();

    let resp = reconciler.handle(
        Method::POST,
        json!({"sessionId": "s1", "userAgent": "A"}).to_string().as_bytes(),
    );
    assert_eq!(resp.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body, json!({"success": true}));
    assert_eq!(sessions_with_id(&provider, "s1"), 1);

    assert_eq!(post(&reconciler, json!({"sessionId": "s1", "userAgent": "B"})), 200);
    assert_eq!(sessions_with_id(&provider, "s1"), 1);

    let stored = reconciler.find("s1").unwrap().unwrap();
    assert_eq!(stored.user_agent, Value::Text("B".into()));
}

#[test]
fn identical_payload_twice_stores_one_record() {
    let (provider, reconciler) = create_test_reconciler();
    let payload = json!({
        "sessionId": "abc-123",
        "startTime": "2024-05-01T10:00:00Z",
        "userAgent": "Mozilla/5.0",
        "language": "en-US",
    })
    .to_string();

    assert_eq!(
        reconciler.reconcile(payload.as_bytes()).unwrap(),
        SessionTransition::Created
    );
    assert_eq!(
        reconciler.reconcile(payload.as_bytes()).unwrap(),
        SessionTransition::Updated
    );
    assert_eq!(sessions_with_id(&provider, "abc-123"), 1);
    assert_eq!(total_sessions(&provider), 1);
}

#[test]
fn update_overwrites_every_mutable_field() {
    let (_, reconciler) = create_test_reconciler();
    post(
        &reconciler,
        json!({"sessionId": "s2", "userAgent": "A", "referrer": "https://ref.example"}),
    );
    post(&reconciler, json!({"sessionId": "s2", "language": "fr"}));

    let stored = reconciler.find("s2").unwrap().unwrap();
    assert_eq!(stored.language, Value::Text("fr".into()));
    assert_eq!(stored.user_agent, Value::Null);
    assert_eq!(stored.referrer, Value::Null);
}

#[test]
fn legacy_tracker_fields_land_in_storage_columns() {
    let (provider, reconciler) = create_test_reconciler();
    post(
        &reconciler,
        json!({
            "sessionId": "legacy",
            "userPath": "/pricing",
            "sessionDuration": 1200,
            "token": "tok",
            "screenResolution": "1920x1080",
        }),
    );

    let gateway = QueryGateway::new(provider);
    let record = gateway
        .read_one(
            &QueryRequest::new(
                "SELECT userPath, sessionDuration, token, screenResolution
                 FROM sessions WHERE sessionId = ?",
            )
            .with_param("legacy"),
        )
        .unwrap();
    assert_eq!(record.get("userPath"), Some(&Value::Text("/pricing".into())));
    assert_eq!(record.get("sessionDuration"), Some(&Value::Integer(1200)));
    assert_eq!(record.get("token"), Some(&Value::Text("tok".into())));
    assert_eq!(
        record.get("screenResolution"),
        Some(&Value::Text("1920x1080".into()))
    );
}

#[test]
fn missing_session_id_writes_nothing() {
    let (provider, reconciler) = create_test_reconciler();
    let resp = reconciler.handle(
        Method::POST,
        json!({"userAgent": "A"}).to_string().as_bytes(),
    );
    assert_eq!(resp.status, 400);
    assert!(resp
        .body_text()
        .contains("sessionId not found in session data"));

    assert_eq!(post(&reconciler, json!({"sessionId": 42})), 400);
    assert_eq!(total_sessions(&provider), 0);
}

#[test]
fn malformed_json_is_a_client_error() {
    let (provider, reconciler) = create_test_reconciler();
    let resp = reconciler.handle(Method::POST, b"{invalid json}");
    assert_eq!(resp.status, 400);
    assert_eq!(total_sessions(&provider), 0);
}

#[test]
fn preflight_and_method_handling() {
    let (_, reconciler) = create_test_reconciler();

    let resp = reconciler.handle(Method::OPTIONS, b"");
    assert_eq!(resp.status, 200);
    assert!(resp.body.is_empty());
    assert_eq!(
        resp.header("Access-Control-Allow-Origin"),
        Some("https://example.com")
    );
    assert_eq!(resp.header("Access-Control-Allow-Methods"), Some("POST"));
    assert_eq!(
        resp.header("Access-Control-Allow-Headers"),
        Some("Content-Type")
    );

    let resp = reconciler.handle(Method::GET, b"");
    assert_eq!(resp.status, 405);
    assert_eq!(resp.header("Access-Control-Allow-Methods"), Some("POST"));
}

#[test]
fn concurrent_first_contact_on_one_provider_yields_one_row() {
    let (provider, reconciler) = create_test_reconciler();
    let payload = json!({"sessionId": "race", "userAgent": "A"}).to_string();

    let transitions: Vec<SessionTransition> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..16)
            .map(|_| scope.spawn(|| reconciler.reconcile(payload.as_bytes()).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let created = transitions
        .iter()
        .filter(|t| **t == SessionTransition::Created)
        .count();
    assert_eq!(created, 1);
    assert_eq!(sessions_with_id(&provider, "race"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_contact_across_connections_yields_one_row() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = DatabaseConfig {
        path: temp_file.path().to_str().unwrap().to_string(),
        ..DatabaseConfig::default()
    };
    let (provider, _) = create_reconciler(&config);

    let workers = (0..8).map(|n| {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            let provider = Arc::new(SqliteProvider::open(&config).unwrap());
            let reconciler = SessionReconciler::new(provider);
            let payload = json!({"sessionId": "shared", "userId": format!("u{n}")}).to_string();
            reconciler.reconcile(payload.as_bytes()).unwrap()
        })
    });
    let transitions: Vec<SessionTransition> = futures::future::join_all(workers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let created = transitions
        .iter()
        .filter(|t| **t == SessionTransition::Created)
        .count();
    assert_eq!(created, 1);
    assert_eq!(transitions.len(), 8);
    assert_eq!(sessions_with_id(&provider, "shared"), 1);
}
