//! HTTP API gateway for the Radio Control Container.
//!
//! Exposes the `/api/v1` surface: radio inventory and control
//! endpoints plus the server-sent telemetry stream. Built on Axum.
//!
//! Layers applied, outermost first: HTTP trace logging, CORS,
//! panic-to-INTERNAL conversion, correlation ids, bearer
//! authentication (everything except `/health`).

pub mod api;

use std::any::Any;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use rcc_auth::TokenVerifier;
use rcc_config::TimingConfig;
use rcc_hub::TelemetryHub;
use rcc_orchestrator::Orchestrator;
use rcc_radio::RadioManager;

use api::{ApiError, CorrelationId};

/// Shared state for the gateway.
pub struct AppState {
    pub verifier: Arc<TokenVerifier>,
    pub orchestrator: Arc<Orchestrator>,
    pub manager: Arc<RadioManager>,
    pub hub: TelemetryHub,
    pub timing: TimingConfig,
}

pub type SharedState = Arc<AppState>;

/// Build the full router.
pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/capabilities", get(api::capabilities_handler))
        .route("/radios", get(api::list_radios_handler))
        .route("/radios/select", post(api::select_radio_handler))
        .route("/radios/{id}", get(api::get_radio_handler))
        .route(
            "/radios/{id}/power",
            get(api::get_power_handler).post(api::set_power_handler),
        )
        .route(
            "/radios/{id}/channel",
            get(api::get_channel_handler).post(api::set_channel_handler),
        )
        .route("/telemetry", get(api::telemetry_stream_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    let open = Router::new()
        .route("/health", get(api::health_handler))
        .with_state(state);

    Router::new()
        .nest("/api/v1", open.merge(protected))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(CatchPanicLayer::custom(InternalErrorOnPanic))
        .layer(cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the HTTP server; resolves once `shutdown` completes and the
/// listener has drained.
pub async fn serve(
    addr: &str,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::mirror_request())
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
}

/// Attach a fresh correlation id to every request.
async fn correlation_middleware(mut req: Request, next: Next) -> Response {
    req.extensions_mut()
        .insert(CorrelationId(uuid::Uuid::new_v4().to_string()));
    next.run(req).await
}

/// Bearer authentication. On success the verified claims ride the
/// request extensions; scope checks stay with each handler.
async fn auth_middleware(State(state): State<SharedState>, mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .extensions()
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_default();

    if state.verifier.is_disabled() {
        req.extensions_mut().insert(TokenVerifier::anonymous_claims());
        return next.run(req).await;
    }

    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return ApiError::unauthorized("missing bearer token", &correlation_id).into_response();
    };

    match state.verifier.verify(token).await {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            warn!(error = %e, "token verification failed");
            ApiError::unauthorized(e.to_string(), &correlation_id).into_response()
        }
    }
}

/// Renders handler panics as INTERNAL envelopes; the process lives on.
#[derive(Clone, Copy)]
struct InternalErrorOnPanic;

impl ResponseForPanic for InternalErrorOnPanic {
    type ResponseBody = axum::body::Body;

    fn response_for_panic(
        &mut self,
        err: Box<dyn Any + Send + 'static>,
    ) -> axum::http::Response<Self::ResponseBody> {
        let detail = err
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| err.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        let correlation_id = CorrelationId(uuid::Uuid::new_v4().to_string());
        error!(correlation_id = %correlation_id.0, detail, "request handler panicked");
        ApiError::new(
            rcc_core::ErrorKind::Internal,
            "internal error",
            &correlation_id,
        )
        .into_response()
    }
}
