// SPDX-License-Identifier: MIT

//! Research aggregation endpoint.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::services::research::ResearchBundle;
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Research routes (auth + Basic tier, layered in routes/mod.rs).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/research", get(get_research))
}

#[derive(Deserialize, Validate)]
pub struct ResearchQuery {
    #[validate(length(min = 2, max = 80, message = "topic must be 2-80 characters"))]
    pub topic: String,
}

/// Aggregate research for a topic. Consumes one daily research credit.
async fn get_research(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ResearchQuery>,
) -> Result<Json<ResearchBundle>> {
    query
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    state
        .tier_service
        .consume_research_credit(&user.user_id)
        .await?;

    let bundle = state.research_service.research(&query.topic).await?;

    Ok(Json(bundle))
}
