//! Employee directory and self-service profile.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use uuid::Uuid;

use crate::AppState;
use crate::error::Result;
use crate::model::{Account, EmployeeProfile};
use crate::workflow::employees::{self, Directory, EmployeeView, ProfileUpdate};

pub async fn me(State(state): State<AppState>, Extension(account): Extension<Account>) -> Result<Json<EmployeeProfile>> {
    Ok(Json(employees::me(&state, &account).await?))
}

/// Validation runs in the workflow, after the empty-update check.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<EmployeeProfile>> {
    Ok(Json(employees::update_me(&state, &account, update).await?))
}

pub async fn directory(State(state): State<AppState>) -> Result<Json<Directory>> {
    Ok(Json(employees::directory(&state).await?))
}

pub async fn find(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<EmployeeView>> {
    Ok(Json(employees::find(&state, id).await?))
}
