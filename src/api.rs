//! HTTP surface: `GET /recommend`, `GET /healthz` and permissive CORS.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::recommend::{CatalogSummary, RecommendError, Recommendations, Recommender};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    recommender: Arc<Recommender>,
    cors_origin: HeaderValue,
}

impl ApiState {
    /// Builds state, validating the CORS origin header value.
    pub fn new(recommender: Arc<Recommender>, cors_origin: &str) -> anyhow::Result<Self> {
        let cors_origin = HeaderValue::from_str(cors_origin)
            .with_context(|| format!("invalid CORS origin {cors_origin:?}"))?;
        Ok(Self {
            recommender,
            cors_origin,
        })
    }
}

/// Query-string parameters of `/recommend`.
#[derive(Debug, Default, Deserialize)]
pub struct RecommendParams {
    /// Free-text query or an exact course title.
    #[serde(default)]
    pub query: Option<String>,
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub message: String,
}

/// Handler failure mapped to an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Status code sent to the client.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Message sent to the client.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        let status = match &err {
            RecommendError::EmptyQuery => StatusCode::BAD_REQUEST,
            RecommendError::Encode(inner) if inner.is_input_error() => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RecommendError::Encode(_) => StatusCode::BAD_GATEWAY,
            RecommendError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "recommendation request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    catalogs: Vec<CatalogSummary>,
}

/// Routes with CORS applied.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/recommend", get(recommend_handler))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

/// Serves `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("listener has no local address")?;
    tracing::info!(%addr, "coursefind listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown")
}

async fn healthz(State(state): State<ApiState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        catalogs: state.recommender.summary(),
    })
}

/// `GET /recommend?query=...`
pub async fn recommend_handler(
    State(state): State<ApiState>,
    params: Result<Query<RecommendParams>, QueryRejection>,
) -> Result<Json<Recommendations>, ApiError> {
    let Query(params) = params?;
    let query = params.query.unwrap_or_default();
    let response = state.recommender.recommend(&query).await?;
    Ok(Json(response))
}

async fn cors(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, state.cors_origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}
