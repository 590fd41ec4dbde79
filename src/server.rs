use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::QuarryError;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub terms: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct FactsRequest {
    pub facts: String,
    #[serde(default)]
    pub retract: bool,
}

#[derive(Serialize)]
pub struct FactsResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn status_of(e: &QuarryError) -> StatusCode {
    match e {
        QuarryError::Compile(_) => StatusCode::BAD_REQUEST,
        QuarryError::Cycle { .. } | QuarryError::StaleEntity(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(engine: Engine, row_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    let query_engine = engine.clone();
    Router::new()
        .route("/v1/query", post(move |Json(req): Json<QueryRequest>| {
            let engine = query_engine.clone();
            async move {
                // the engine is synchronous, keep it off the async workers
                let started = std::time::Instant::now();
                let limit = Some(req.limit.map_or(row_limit, |l| l.min(row_limit)));
                let result = tokio::task::spawn_blocking(move || engine.execute_collect(&req.terms, limit))
                    .await
                    .map_err(|e| {
                        warn!(error=%e, "Join error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "Join error")
                    })?;
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                match result {
                    Ok(result) => {
                        info!(ms=elapsed_ms, rows=result.row_count, limited=result.limited, "query complete");
                        let body = QueryResponse {
                            status: "ok".into(),
                            elapsed_ms,
                            columns: Some(result.columns),
                            row_count: Some(result.row_count),
                            limited: Some(result.limited),
                            rows: Some(result.rows),
                            error: None,
                        };
                        Ok::<_, (StatusCode, &'static str)>((StatusCode::OK, Json(body)))
                    }
                    Err(e) => {
                        let status = status_of(&e);
                        let msg = format!("{e}");
                        warn!(%msg, code=%status.as_u16(), "query error");
                        let body = QueryResponse {
                            status: "error".into(),
                            elapsed_ms,
                            columns: None,
                            row_count: None,
                            limited: None,
                            rows: None,
                            error: Some(msg),
                        };
                        Ok((status, Json(body)))
                    }
                }
            }
        }))
        .route("/v1/facts", post(move |Json(req): Json<FactsRequest>| {
            let engine = engine.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || {
                    if req.retract {
                        engine.retract_facts(&req.facts)
                    } else {
                        engine.assert_facts(&req.facts)
                    }
                })
                .await
                .map_err(|e| {
                    warn!(error=%e, "Join error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Join error")
                })?;
                match result {
                    Ok(changed) => {
                        info!(changed, "facts applied");
                        let body = FactsResponse { status: "ok".into(), changed: Some(changed), error: None };
                        Ok::<_, (StatusCode, &'static str)>((StatusCode::OK, Json(body)))
                    }
                    Err(e) => {
                        let status = status_of(&e);
                        let msg = format!("{e}");
                        warn!(%msg, code=%status.as_u16(), "facts error");
                        let body = FactsResponse { status: "error".into(), changed: None, error: Some(msg) };
                        Ok((status, Json(body)))
                    }
                }
            }
        }))
        .layer(cors)
}
