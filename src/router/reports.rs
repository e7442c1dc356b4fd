//! Facility reports and comments.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::model::{Account, Comment, ReportThread};
use crate::router::Valid;
use crate::workflow::reports::{self, CommentForm, CommentView, NewReport, ReportDetail, ReportPage};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct StatusBody {
    #[validate(length(min = 1, message = "Status is required."))]
    pub status: String,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Valid(body): Valid<NewReport>,
) -> Result<(StatusCode, Json<ReportThread>)> {
    let report = reports::create(&state, &account, body).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list_mine(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ReportPage>> {
    Ok(Json(reports::list_mine(&state, &account, query.page.unwrap_or(1)).await?))
}

pub async fn list_for_house(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ReportPage>> {
    Ok(Json(reports::list_for_house(&state, id, query.page.unwrap_or(1)).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportDetail>> {
    Ok(Json(reports::get(&state, &account, id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<Uuid>,
    Valid(body): Valid<StatusBody>,
) -> Result<Json<ReportThread>> {
    Ok(Json(reports::update_status(&state, &account, id, &body.status).await?))
}

pub async fn comments(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CommentView>>> {
    Ok(Json(reports::comments(&state, &account, id).await?))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path(id): Path<Uuid>,
    Valid(body): Valid<CommentForm>,
) -> Result<(StatusCode, Json<Comment>)> {
    let comment = reports::add_comment(&state, &account, id, body).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
    Valid(body): Valid<CommentForm>,
) -> Result<Json<Comment>> {
    Ok(Json(reports::update_comment(&state, &account, id, comment_id, body).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::app;
    use crate::router::tests::{harness, json, make_request};
    use crate::workflow::housing;

    #[tokio::test]
    async fn test_report_thread() {
        let harness = harness();
        let hr = harness.hr().await;
        let house = harness.house().await;
        let (alice, _) = harness.opt_employee("alice").await;
        let (bob, _) = harness.opt_employee("bob").await;
        housing::assign(&harness.state, alice.id).await.unwrap();
        housing::assign(&harness.state, bob.id).await.unwrap();
        let app = app(harness.state.clone());
        let author = harness.bearer(&alice);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/housing/reports",
            Some(&author),
            Some(json!({ "title": "Broken heater", "description": "No heat since Monday." })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json(response).await["id"].as_str().unwrap().to_owned();

        let response = make_request(
            app.clone(),
            Method::GET,
            &format!("/housing/reports/{id}"),
            Some(&harness.bearer(&bob)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let reviewer = harness.bearer(&hr);
        let response = make_request(
            app.clone(),
            Method::POST,
            &format!("/housing/reports/{id}/comments"),
            Some(&reviewer),
            Some(json!({ "message": "Technician booked." })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let comment_id = json(response).await["id"].as_str().unwrap().to_owned();

        let response = make_request(
            app.clone(),
            Method::PUT,
            &format!("/housing/reports/{id}/comments/{comment_id}"),
            Some(&author),
            Some(json!({ "message": "hijacked" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app.clone(),
            Method::PATCH,
            &format!("/housing/reports/{id}"),
            Some(&reviewer),
            Some(json!({ "status": "Closed" })),
        )
        .await;
        assert_eq!(json(response).await["status"], "Closed");

        let response = make_request(
            app,
            Method::GET,
            &format!("/hr/housing/{}/reports?page=1", house.id),
            Some(&reviewer),
            None,
        )
        .await;
        let page = json(response).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["perPage"], 5);
    }
}
