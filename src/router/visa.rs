//! OPT document uploads, status and the HR dashboard.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::model::{Account, DocumentType, OptDocument};
use crate::router::{UploadForm, Valid};
use crate::workflow::Decision;
use crate::workflow::visa::{self, Reminder, StatusPayload, VisaCase, VisaRecord};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReviewBody {
    #[validate(length(min = 1, message = "Action is required."))]
    pub action: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

pub async fn status(State(state): State<AppState>, Extension(account): Extension<Account>) -> Result<Json<StatusPayload>> {
    Ok(Json(visa::status(&state, &account).await?))
}

/// Multipart with `documentType` and `file`.
pub async fn submit(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<OptDocument>)> {
    let form = UploadForm::read(multipart).await?;
    let document_type: DocumentType = form.field("documentType")?.parse().map_err(|_| {
        ServerError::field("documentType", "document_type", "Unknown document type.")
    })?;

    let document = visa::submit_document(&state, &account, document_type, form.file()?).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn pending(State(state): State<AppState>) -> Result<Json<Vec<VisaCase>>> {
    Ok(Json(visa::pending(&state).await?))
}

pub async fn all(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Result<Json<Vec<VisaRecord>>> {
    Ok(Json(visa::all(&state, query.search.as_deref()).await?))
}

pub async fn review(
    State(state): State<AppState>,
    Extension(hr): Extension<Account>,
    Path(id): Path<Uuid>,
    Valid(body): Valid<ReviewBody>,
) -> Result<Json<OptDocument>> {
    let decision = Decision::parse(&body.action, body.feedback.as_deref())?;
    Ok(Json(visa::review_document(&state, &hr, id, decision).await?))
}

pub async fn notify(State(state): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<Reminder>> {
    Ok(Json(visa::notify(&state, user_id).await?))
}
