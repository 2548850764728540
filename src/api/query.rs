//! Query endpoint: the `run_query` contract over HTTP.

use crate::api::ApiError;
use axum::extract::Extension;
use axum::routing::post;
use axum::{Json, Router};
use plexpool_pool::{run_query, ClientPool, QueryRequest};
use plexpool_upstream::SearchResponse;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response for POST /api/v1/query
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    /// Flattened answer text
    pub answer: String,
    pub related_queries: Vec<String>,
    /// Mode the upstream reports it answered in, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl From<SearchResponse> for QueryResponse {
    fn from(response: SearchResponse) -> Self {
        Self {
            answer: response
                .answer
                .as_ref()
                .map(|a| a.text())
                .unwrap_or_default(),
            related_queries: response.related_queries,
            mode: response.mode,
        }
    }
}

/// POST /api/v1/query handler.
#[instrument(skip(pool, request), fields(mode = ?request.mode))]
async fn post_query(
    Extension(pool): Extension<Arc<ClientPool>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let response = run_query(&pool, request).await?;
    Ok(Json(response.into()))
}

/// Create the query routes.
pub fn query_routes() -> Router {
    Router::new().route("/api/v1/query", post(post_query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexpool_upstream::AnswerBody;

    #[test]
    fn test_response_flattening() {
        let response = SearchResponse {
            answer: Some(AnswerBody::Text("the answer".to_string())),
            related_queries: vec!["next".to_string()],
            mode: Some("pro".to_string()),
            raw: serde_json::Value::Null,
        };
        let flat: QueryResponse = response.into();
        assert_eq!(flat.answer, "the answer");
        assert_eq!(flat.related_queries, vec!["next".to_string()]);
        assert_eq!(flat.mode.as_deref(), Some("pro"));
    }
}
