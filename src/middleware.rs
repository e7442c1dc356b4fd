//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::AppState;
use crate::ServerError;
use crate::database::AccountStore;
use crate::error::Result;
use crate::model::{Account, OnboardingStatus};
use crate::workflow::visa;

const BEARER: &str = "Bearer ";

/// Resolve the session token into the calling [`Account`].
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .ok_or(ServerError::Unauthorized)?;

    let claims = state
        .token
        .decode(token.trim())
        .map_err(|_| ServerError::Unauthorized)?;
    let id = Uuid::parse_str(&claims.sub).map_err(|_| ServerError::Unauthorized)?;

    let account = state
        .db
        .find_account(id)
        .await?
        .ok_or(ServerError::Unauthorized)?;
    if !account.is_active {
        return Err(ServerError::Forbidden("account is deactivated"));
    }

    req.extensions_mut().insert::<Account>(account);
    Ok(next.run(req).await)
}

fn caller(req: &Request) -> Result<&Account> {
    req.extensions()
        .get::<Account>()
        .ok_or(ServerError::Unauthorized)
}

pub async fn hr_only(req: Request, next: Next) -> Result<Response> {
    if !caller(&req)?.is_hr() {
        return Err(ServerError::Forbidden("HR only"));
    }

    Ok(next.run(req).await)
}

pub async fn employee_only(req: Request, next: Next) -> Result<Response> {
    if caller(&req)?.is_hr() {
        return Err(ServerError::Forbidden("employees only"));
    }

    Ok(next.run(req).await)
}

/// Employees whose onboarding has been approved.
pub async fn approved_employee(req: Request, next: Next) -> Result<Response> {
    let account = caller(&req)?;
    if account.is_hr() || account.onboarding_status != OnboardingStatus::Approved {
        return Err(ServerError::Forbidden("onboarding must be approved first"));
    }

    Ok(next.run(req).await)
}

/// Approved F1 CPT/OPT employees; exposes their profile to handlers.
pub async fn visa_case(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response> {
    let account = caller(&req)?.clone();
    let profile = visa::ensure_visa_case(&state, &account).await?;

    req.extensions_mut().insert(profile);
    Ok(next.run(req).await)
}
