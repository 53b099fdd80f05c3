//! `/api/v1` handlers, envelopes, and the telemetry stream.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use rcc_core::{Claims, CommandError, ErrorKind, Event, InventorySource, Scope};
use rcc_hub::SubscribeOptions;

use crate::SharedState;

/// Per-request correlation id, attached by middleware and echoed in
/// every envelope.
#[derive(Debug, Clone, Default)]
pub struct CorrelationId(pub String);

// ── Envelopes ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OkEnvelope<T: Serialize> {
    result: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,

    correlation_id: String,
}

fn ok<T: Serialize>(data: T, correlation_id: &CorrelationId) -> Json<OkEnvelope<T>> {
    Json(OkEnvelope {
        result: "ok",
        data: Some(data),
        correlation_id: correlation_id.0.clone(),
    })
}

fn ok_empty(correlation_id: &CorrelationId) -> Json<OkEnvelope<serde_json::Value>> {
    Json(OkEnvelope {
        result: "ok",
        data: None,
        correlation_id: correlation_id.0.clone(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    result: &'static str,
    code: &'static str,
    message: String,
    correlation_id: String,
}

/// A request failure carrying its normalized kind and correlation id.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    correlation_id: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, cid: &CorrelationId) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: cid.0.clone(),
        }
    }

    pub fn unauthorized(message: impl Into<String>, cid: &CorrelationId) -> Self {
        Self::new(ErrorKind::Unauthorized, message, cid)
    }

    fn from_command(err: CommandError, cid: &CorrelationId) -> Self {
        Self::new(err.kind, err.message, cid)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorEnvelope {
                result: "error",
                code: self.kind.as_code(),
                message: self.message,
                correlation_id: self.correlation_id,
            }),
        )
            .into_response()
    }
}

fn require_scope(claims: &Claims, scope: Scope, cid: &CorrelationId) -> Result<(), ApiError> {
    if claims.has_all_scopes(&[scope]) {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorKind::Forbidden,
            format!("scope '{}' required", scope.as_str()),
            cid,
        ))
    }
}

// ── Request / response types ──────────────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityDescriptor {
    api_version: &'static str,
    event_types: Vec<&'static str>,
    heartbeat_interval_ms: u64,
    /// See no event for this long and the stream should be considered
    /// dead; reconnect with `Last-Event-ID`.
    stream_liveness_ms: u64,
    command_timeouts_ms: CommandTimeoutsDto,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandTimeoutsDto {
    set_power: u64,
    set_channel: u64,
    select_radio: u64,
    get_state: u64,
}

#[derive(Deserialize)]
pub(crate) struct SelectRadioRequest {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetPowerRequest {
    power_dbm: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PowerResponse {
    power_dbm: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetChannelRequest {
    #[serde(default)]
    channel_index: Option<u32>,
    #[serde(default)]
    frequency_mhz: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    frequency_mhz: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_index: Option<u32>,
}

#[derive(Deserialize)]
pub(crate) struct TelemetryQuery {
    #[serde(rename = "lastEventId")]
    last_event_id: Option<i64>,
    radio: Option<String>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub(crate) async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn capabilities_handler(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Read, &cid)?;
    let t = &state.timing;
    Ok(ok(
        CapabilityDescriptor {
            api_version: "v1",
            event_types: vec![
                "ready",
                "state",
                "powerChanged",
                "channelChanged",
                "fault",
                "heartbeat",
            ],
            heartbeat_interval_ms: t.heartbeat_interval.as_millis() as u64,
            stream_liveness_ms: t.heartbeat_timeout.as_millis() as u64,
            command_timeouts_ms: CommandTimeoutsDto {
                set_power: t.command_timeouts.set_power.as_millis() as u64,
                set_channel: t.command_timeouts.set_channel.as_millis() as u64,
                select_radio: t.command_timeouts.select_radio.as_millis() as u64,
                get_state: t.command_timeouts.get_state.as_millis() as u64,
            },
        },
        &cid,
    ))
}

pub(crate) async fn list_radios_handler(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Read, &cid)?;
    Ok(ok(state.manager.snapshot(), &cid))
}

pub(crate) async fn get_radio_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Read, &cid)?;
    let radio = state
        .manager
        .get(&id)
        .map_err(|e| ApiError::from_command(e.into(), &cid))?;
    Ok(ok(radio, &cid))
}

pub(crate) async fn select_radio_handler(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<SelectRadioRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Control, &cid)?;
    state
        .orchestrator
        .select_radio(&claims.subject, &req.id)
        .await
        .map_err(|e| ApiError::from_command(e, &cid))?;
    Ok(ok_empty(&cid))
}

pub(crate) async fn get_power_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Read, &cid)?;
    let snapshot = state
        .orchestrator
        .get_state(&claims.subject, &id)
        .await
        .map_err(|e| ApiError::from_command(e, &cid))?;
    Ok(ok(
        PowerResponse {
            power_dbm: snapshot.power_dbm,
        },
        &cid,
    ))
}

pub(crate) async fn set_power_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<SetPowerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Control, &cid)?;
    state
        .orchestrator
        .set_power(&claims.subject, &id, req.power_dbm)
        .await
        .map_err(|e| ApiError::from_command(e, &cid))?;
    Ok(ok_empty(&cid))
}

pub(crate) async fn get_channel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Read, &cid)?;
    let snapshot = state
        .orchestrator
        .get_state(&claims.subject, &id)
        .await
        .map_err(|e| ApiError::from_command(e, &cid))?;
    let channel_index = state
        .manager
        .get(&id)
        .ok()
        .and_then(|r| r.capabilities.index_for_frequency(snapshot.frequency_mhz));
    Ok(ok(
        ChannelResponse {
            frequency_mhz: snapshot.frequency_mhz,
            channel_index,
        },
        &cid,
    ))
}

pub(crate) async fn set_channel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<SetChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_scope(&claims, Scope::Control, &cid)?;
    let result = match (req.channel_index, req.frequency_mhz) {
        (Some(index), None) => {
            state
                .orchestrator
                .set_channel_by_index(&claims.subject, &id, index)
                .await
        }
        (None, Some(frequency)) => {
            state
                .orchestrator
                .set_frequency(&claims.subject, &id, frequency)
                .await
        }
        _ => Err(CommandError::invalid_range(
            "body must carry exactly one of channelIndex or frequencyMhz",
        )),
    };
    result.map_err(|e| ApiError::from_command(e, &cid))?;
    Ok(ok_empty(&cid))
}

/// `GET /api/v1/telemetry` — the event stream. Resumption comes from
/// the `Last-Event-ID` header (or `lastEventId` query) scoped by
/// `?radio=`; frames follow the `id:` / `event:` / `data:` layout.
pub(crate) async fn telemetry_stream_handler(
    State(state): State<SharedState>,
    Query(query): Query<TelemetryQuery>,
    headers: HeaderMap,
    Extension(claims): Extension<Claims>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    require_scope(&claims, Scope::Telemetry, &cid)?;

    let resume_from = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .or(query.last_event_id);

    let subscription = state
        .hub
        .subscribe(SubscribeOptions {
            resume_from,
            radio: query.radio,
        })
        .map_err(|e| ApiError::new(ErrorKind::Unavailable, e.to_string(), &cid))?;

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        subscription
            .recv()
            .await
            .map(|event| (Ok(frame(event)), subscription))
    });
    Ok(Sse::new(stream))
}

fn frame(event: Event) -> SseEvent {
    SseEvent::default()
        .id(event.id.to_string())
        .event(event.event_type.as_str())
        .data(event.data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppState, build_router};
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use rcc_core::RadioAdapter;
    use http_body_util::BodyExt;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use rcc_audit::MemoryAuditLog;
    use rcc_auth::TokenVerifier;
    use rcc_config::{ChannelPlan, TimingConfig};
    use rcc_core::{Channel, EventType};
    use rcc_hub::TelemetryHub;
    use rcc_orchestrator::Orchestrator;
    use rcc_radio::{RadioManager, RegistrationOptions, SimulatedAdapter};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"gateway-test-secret";

    struct Fixture {
        state: SharedState,
        audit: Arc<MemoryAuditLog>,
        adapter: Arc<SimulatedAdapter>,
    }

    async fn fixture() -> Fixture {
        let timing = TimingConfig::default();
        let plan = ChannelPlan(HashMap::from([(
            "wave-x".to_string(),
            HashMap::from([(
                "2g4".to_string(),
                vec![
                    Channel { index: 1, frequency_mhz: 2412.0 },
                    Channel { index: 6, frequency_mhz: 2437.0 },
                    Channel { index: 11, frequency_mhz: 2462.0 },
                ],
            )]),
        )]));

        let manager = Arc::new(RadioManager::new(plan));
        let adapter = Arc::new(SimulatedAdapter::new(2412.0));
        manager
            .register(
                "r1",
                "wave-x",
                adapter.clone(),
                RegistrationOptions::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let hub = TelemetryHub::new(&timing, manager.clone());
        let audit = Arc::new(MemoryAuditLog::new());
        let orchestrator = Arc::new(Orchestrator::new(
            manager.clone(),
            hub.clone(),
            audit.clone(),
            timing.command_timeouts.clone(),
        ));

        let state = Arc::new(AppState {
            verifier: Arc::new(TokenVerifier::hs256(SECRET)),
            orchestrator,
            manager,
            hub,
            timing,
        });
        Fixture {
            state,
            audit,
            adapter,
        }
    }

    fn token(scopes: &[&str]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({
                "sub": "alice",
                "roles": ["controller"],
                "scopes": scopes,
                "exp": chrono::Utc::now().timestamp() + 3600,
            }),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn request(
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let f = fixture().await;
        let response = build_router(f.state)
            .oneshot(request("GET", "/api/v1/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let f = fixture().await;
        let response = build_router(f.state)
            .oneshot(request("GET", "/api/v1/radios", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["result"], "error");
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert!(body["correlationId"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn missing_scope_is_forbidden_and_leaves_no_trace() {
        let f = fixture().await;
        let token = token(&["read", "telemetry"]);
        let response = build_router(f.state.clone())
            .oneshot(request(
                "POST",
                "/api/v1/radios/select",
                Some(&token),
                Some(serde_json::json!({"id": "r1"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "FORBIDDEN");

        // The orchestrator was never invoked: no audit record, no
        // active-radio change.
        assert_eq!(f.audit.count(), 0);
        assert!(f.state.manager.active().is_none());
    }

    #[tokio::test]
    async fn power_round_trip_end_to_end() {
        let f = fixture().await;
        let mut sub = f
            .state
            .hub
            .subscribe(SubscribeOptions {
                resume_from: None,
                radio: Some("r1".into()),
            })
            .unwrap();
        sub.recv().await.unwrap(); // ready

        let token = token(&["read", "control"]);
        let response = build_router(f.state.clone())
            .oneshot(request(
                "POST",
                "/api/v1/radios/r1/power",
                Some(&token),
                Some(serde_json::json!({"powerDbm": 30.0})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"], "ok");

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "setPower");
        assert_eq!(records[0].radio_id, "r1");
        assert_eq!(records[0].code, "SUCCESS");

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::PowerChanged);
        assert_eq!(event.data["powerDbm"], 30.0);

        assert_eq!(f.adapter.read_power_actual().await.unwrap(), 30.0);
    }

    #[tokio::test]
    async fn out_of_range_power_is_a_400() {
        let f = fixture().await;
        let token = token(&["control"]);
        let response = build_router(f.state.clone())
            .oneshot(request(
                "POST",
                "/api/v1/radios/r1/power",
                Some(&token),
                Some(serde_json::json!({"powerDbm": 50.0})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "INVALID_RANGE");

        assert_eq!(f.adapter.read_power_actual().await.unwrap(), 0.0);
        assert_eq!(f.audit.records()[0].code, "INVALID_RANGE");
    }

    #[tokio::test]
    async fn unknown_radio_is_a_404() {
        let f = fixture().await;
        let token = token(&["read"]);
        let response = build_router(f.state)
            .oneshot(request("GET", "/api/v1/radios/ghost", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn radio_listing_and_capabilities() {
        let f = fixture().await;
        let token = token(&["read"]);

        let response = build_router(f.state.clone())
            .oneshot(request("GET", "/api/v1/radios", Some(&token), None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["result"], "ok");
        assert_eq!(body["data"]["radios"][0]["id"], "r1");
        assert_eq!(body["data"]["activeRadioId"], serde_json::Value::Null);

        let response = build_router(f.state)
            .oneshot(request("GET", "/api/v1/capabilities", Some(&token), None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["apiVersion"], "v1");
        assert_eq!(body["data"]["heartbeatIntervalMs"], 15000);
        assert_eq!(body["data"]["streamLivenessMs"], 45000);
        assert_eq!(body["data"]["commandTimeoutsMs"]["setPower"], 10000);
    }

    #[tokio::test]
    async fn channel_endpoints_accept_index_or_frequency() {
        let f = fixture().await;
        let control = token(&["read", "control"]);

        let response = build_router(f.state.clone())
            .oneshot(request(
                "POST",
                "/api/v1/radios/r1/channel",
                Some(&control),
                Some(serde_json::json!({"channelIndex": 6})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(f.adapter.get_state().await.unwrap().frequency_mhz, 2437.0);

        let response = build_router(f.state.clone())
            .oneshot(request(
                "GET",
                "/api/v1/radios/r1/channel",
                Some(&control),
                None,
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["frequencyMhz"], 2437.0);
        assert_eq!(body["data"]["channelIndex"], 6);

        let response = build_router(f.state.clone())
            .oneshot(request(
                "POST",
                "/api/v1/radios/r1/channel",
                Some(&control),
                Some(serde_json::json!({"frequencyMhz": 2412.0})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Neither or both selectors: rejected before the orchestrator.
        let response = build_router(f.state.clone())
            .oneshot(request(
                "POST",
                "/api/v1/radios/r1/channel",
                Some(&control),
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = build_router(f.state)
            .oneshot(request(
                "POST",
                "/api/v1/radios/r1/channel",
                Some(&control),
                Some(serde_json::json!({"channelIndex": 6, "frequencyMhz": 2437.0})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn telemetry_stream_opens_with_a_ready_frame() {
        let f = fixture().await;
        let token = token(&["telemetry"]);
        let response = build_router(f.state)
            .oneshot(request("GET", "/api/v1/telemetry", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("text/event-stream"))
        );

        let mut stream = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("first frame within deadline")
            .unwrap()
            .unwrap();
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.contains("event: ready"));
        assert!(text.contains("id: "));
        assert!(text.contains("radios"));
    }

    #[tokio::test]
    async fn telemetry_requires_its_scope() {
        let f = fixture().await;
        let token = token(&["read", "control"]);
        let response = build_router(f.state)
            .oneshot(request("GET", "/api/v1/telemetry", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
