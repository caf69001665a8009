//! Spintax preview endpoint.

use axum::{extract::rejection::JsonRejection, Json};
use serde::{Deserialize, Serialize};

use crate::broadcast::MAX_MESSAGE_CHARS;
use crate::error::{AppError, Result};
use crate::spintax;

const DEFAULT_PREVIEW_COUNT: usize = 5;
const MAX_PREVIEW_COUNT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub template: String,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub variants: Vec<String>,
    pub groups: usize,
    pub combinations: u64,
}

/// POST /api/v1/spintax/preview
pub async fn preview_spintax(
    payload: std::result::Result<Json<PreviewRequest>, JsonRejection>,
) -> Result<Json<PreviewResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    if request.template.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "template exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let count = request
        .count
        .unwrap_or(DEFAULT_PREVIEW_COUNT)
        .clamp(1, MAX_PREVIEW_COUNT);
    let stats = spintax::analyze(&request.template);
    let variants = spintax::preview(&request.template, count, &mut rand::rng());

    Ok(Json(PreviewResponse {
        variants,
        groups: stats.groups,
        combinations: stats.combinations,
    }))
}
