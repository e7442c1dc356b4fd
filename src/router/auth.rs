//! Sign-up through an invitation, and sign-in.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::database::AccountStore;
use crate::error::{Result, ServerError};
use crate::model::Account;
use crate::router::Valid;
use crate::workflow::registration;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RegisterBody {
    #[validate(length(min = 1, message = "Registration token is required."))]
    pub token: String,
    #[validate(
        length(min = 3, max = 12, message = "Username must contain 3 to 12 characters."),
        custom(
            function = "crate::router::validate_username",
            message = "Username must be alphanumeric."
        )
    )]
    pub username: String,
    #[validate(
        length(min = 8, max = 16, message = "Password must contain 8 to 16 characters."),
        custom(
            function = "crate::router::validate_password",
            message = "Password needs an uppercase letter, a lowercase letter and a digit."
        )
    )]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginBody {
    #[validate(length(min = 1, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token_type: &'static str,
    pub token: String,
    pub expires_in: i64,
    pub user: Account,
}

impl Session {
    fn new(token: String, user: Account) -> Self {
        Self {
            token_type: TOKEN_TYPE,
            token,
            expires_in: crate::token::EXPIRATION_TIME,
            user,
        }
    }
}

/// Handler to create an account from an invitation.
pub async fn register(
    State(state): State<AppState>,
    Valid(body): Valid<RegisterBody>,
) -> Result<(StatusCode, Json<Session>)> {
    let registered = registration::register(&state, &body.token, &body.username, &body.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(Session::new(registered.session, registered.account)),
    ))
}

/// Handler to open a session.
pub async fn login(State(state): State<AppState>, Valid(body): Valid<LoginBody>) -> Result<Json<Session>> {
    let account = state
        .db
        .find_account_by_username(&body.username.trim().to_lowercase())
        .await?;

    // Unknown usernames fail like wrong passwords.
    let hash = account.as_ref().map(|a| a.password.as_str()).unwrap_or_default();
    let verified = state.crypto.pwd.verify_password(&body.password, hash);

    let account = match (account, verified) {
        (Some(account), Ok(())) => account,
        (_, Err(err)) => return Err(err.into()),
        (None, Ok(())) => return Err(ServerError::Unauthorized),
    };
    if !account.is_active {
        return Err(ServerError::Forbidden("account is deactivated"));
    }

    tracing::info!(user_id = %account.id, "session opened");
    let token = state.token.create(&account, state.clock.now())?;

    Ok(Json(Session::new(token, account)))
}
