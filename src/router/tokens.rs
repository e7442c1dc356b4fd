//! Registration invitations.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::model::Account;
use crate::router::Valid;
use crate::workflow::registration::{self, TokenRecord};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct IssueBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "Name is required."))]
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issued {
    pub email: String,
    pub name: String,
    pub link: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub email: String,
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn issue(
    State(state): State<AppState>,
    Extension(hr): Extension<Account>,
    Valid(body): Valid<IssueBody>,
) -> Result<(StatusCode, Json<Issued>)> {
    let token = registration::issue(&state, &hr, &body.email, &body.name).await?;

    Ok((
        StatusCode::CREATED,
        Json(Issued {
            link: state.config.invitation_link(&token.token),
            email: token.email,
            name: token.name,
            expires_at: token.expires_at,
        }),
    ))
}

pub async fn history(State(state): State<AppState>) -> Result<Json<Vec<TokenRecord>>> {
    Ok(Json(registration::history(&state).await?))
}

/// Public check used by the registration page.
pub async fn validate(State(state): State<AppState>, Query(query): Query<TokenQuery>) -> Result<Json<Invitation>> {
    let token = registration::validate(&state, &query.token).await?;

    Ok(Json(Invitation {
        email: token.email,
        name: token.name,
        expires_at: token.expires_at,
    }))
}
