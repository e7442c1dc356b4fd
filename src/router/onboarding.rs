//! Onboarding submission and review.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::model::{Account, OnboardingApplication};
use crate::router::Valid;
use crate::workflow::onboarding::{self, ApplicationDetail, ApplicationSummary, OnboardingForm, OnboardingView};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RejectBody {
    #[validate(length(min = 1, max = 1000, message = "Feedback is required when rejecting."))]
    pub feedback: String,
}

pub async fn view(State(state): State<AppState>, Extension(account): Extension<Account>) -> Result<Json<OnboardingView>> {
    Ok(Json(onboarding::view(&state, &account).await?))
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Valid(form): Valid<OnboardingForm>,
) -> Result<(StatusCode, Json<OnboardingApplication>)> {
    let application = onboarding::submit(&state, &account, form).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn resubmit(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Valid(form): Valid<OnboardingForm>,
) -> Result<Json<OnboardingApplication>> {
    Ok(Json(onboarding::resubmit(&state, &account, form).await?))
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<Vec<ApplicationSummary>>> {
    Ok(Json(onboarding::list(&state, query.status.as_deref()).await?))
}

pub async fn detail(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ApplicationDetail>> {
    Ok(Json(onboarding::detail(&state, id).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(hr): Extension<Account>,
    Path(id): Path<Uuid>,
) -> Result<Json<OnboardingApplication>> {
    Ok(Json(onboarding::approve(&state, &hr, id).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(hr): Extension<Account>,
    Path(id): Path<Uuid>,
    Valid(body): Valid<RejectBody>,
) -> Result<Json<OnboardingApplication>> {
    Ok(Json(onboarding::reject(&state, &hr, id, &body.feedback).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::app;
    use crate::model::WorkAuthorizationType;
    use crate::router::tests::{harness, json, make_request};
    use crate::workflow::onboarding::tests::form;

    #[tokio::test]
    async fn test_submit_reject_resubmit_approve() {
        let harness = harness();
        let hr = harness.hr().await;
        let alice = harness.employee("alice").await;
        let app = app(harness.state.clone());
        let employee = harness.bearer(&alice);
        let reviewer = harness.bearer(&hr);
        let payload = serde_json::to_value(form(WorkAuthorizationType::H1b)).unwrap();

        let response = make_request(app.clone(), Method::POST, "/onboarding", Some(&employee), Some(payload.clone())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json(response).await["id"].as_str().unwrap().to_owned();

        // HR routes are closed to employees, and employee routes to HR.
        let response = make_request(app.clone(), Method::GET, "/hr/onboarding", Some(&employee), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = make_request(app.clone(), Method::GET, "/onboarding", Some(&reviewer), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app.clone(),
            Method::POST,
            &format!("/hr/onboarding/{id}/reject"),
            Some(&reviewer),
            Some(json!({ "feedback": "" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            app.clone(),
            Method::POST,
            &format!("/hr/onboarding/{id}/reject"),
            Some(&reviewer),
            Some(json!({ "feedback": "Fix SSN" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(app.clone(), Method::GET, "/onboarding", Some(&employee), None).await;
        let view = json(response).await;
        assert_eq!(view["status"], "REJECTED");
        assert_eq!(view["feedback"], "Fix SSN");

        let response = make_request(app.clone(), Method::PUT, "/onboarding", Some(&employee), Some(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(app.clone(), Method::GET, "/hr/onboarding?status=pending", Some(&reviewer), None).await;
        assert_eq!(json(response).await.as_array().map(Vec::len), Some(1));

        let response = make_request(
            app.clone(),
            Method::POST,
            &format!("/hr/onboarding/{id}/approve"),
            Some(&reviewer),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "APPROVED");

        let response = make_request(
            app,
            Method::POST,
            &format!("/hr/onboarding/{id}/approve"),
            Some(&reviewer),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_form_lists_fields() {
        let harness = harness();
        let alice = harness.employee("alice").await;
        let mut payload = serde_json::to_value(form(WorkAuthorizationType::H1b)).unwrap();
        payload["ssn"] = json!("123");

        let response = make_request(
            app(harness.state.clone()),
            Method::POST,
            "/onboarding",
            Some(&harness.bearer(&alice)),
            Some(payload),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["errors"][0]["field"], "ssn");
    }
}
