//! Public configuration page for front-end identification.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

/// Structured configuration.
#[derive(Serialize)]
pub struct Status {
    version: String,
    name: String,
    registration_url: String,
}

/// Public server status (configuration).
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        version: state.config.version().to_owned(),
        name: state.config.name.clone(),
        registration_url: state.config.registration_url(),
    })
}

pub async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::app;
    use crate::router::tests::{harness, json, make_request};

    #[tokio::test]
    async fn test_status_handler() {
        let harness = harness();
        let app = app(harness.state.clone());

        let response = make_request(app.clone(), Method::GET, "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(app, Method::GET, "/status.json", None, None).await;
        let body = json(response).await;
        assert_eq!(body["name"], "hiregate");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
