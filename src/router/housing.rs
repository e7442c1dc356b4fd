//! House inventory for HR and the employee's own house.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use crate::AppState;
use crate::error::Result;
use crate::model::{Account, House};
use crate::router::Valid;
use crate::workflow::housing::{self, HouseDetails, HouseSummary, MyHouse, NewHouse};

pub async fn create(State(state): State<AppState>, Valid(body): Valid<NewHouse>) -> Result<(StatusCode, Json<House>)> {
    let house = housing::create(&state, body).await?;
    Ok((StatusCode::CREATED, Json(house)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<HouseSummary>>> {
    Ok(Json(housing::list(&state).await?))
}

pub async fn details(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<HouseDetails>> {
    Ok(Json(housing::details(&state, id).await?))
}

pub async fn mine(State(state): State<AppState>, Extension(account): Extension<Account>) -> Result<Json<MyHouse>> {
    Ok(Json(housing::mine(&state, &account).await?))
}
