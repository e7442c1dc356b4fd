//! Profile document uploads, preview links and signed downloads.

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::model::Account;
use crate::router::UploadForm;
use crate::storage::{Disposition, SignedLink, StorageError, StoredObject, content_type_of};
use crate::workflow::uploads::{self, ProfileDocument};

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub key: String,
    #[serde(default)]
    pub disposition: Disposition,
}

#[derive(Debug, Serialize)]
pub struct Preview {
    pub url: String,
}

/// Multipart with `docType` and `file`.
pub async fn upload(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<StoredObject>)> {
    let form = UploadForm::read(multipart).await?;
    let kind: ProfileDocument = form.field("docType")?.parse().map_err(|_| {
        ServerError::field("docType", "doc_type", "Must be profile_picture or driver_license.")
    })?;

    let stored = uploads::upload_profile_document(&state, &account, kind, form.file()?).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn preview(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<Preview>> {
    let url = uploads::preview(&state, &account, &query.key, query.disposition)?;
    Ok(Json(Preview { url }))
}

/// Serve an object behind a presigned link.
pub async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(link): Query<SignedLink>,
) -> Result<Response> {
    let bytes = match state.storage.get_signed(&key, &link, state.clock.now()).await {
        Ok(bytes) => bytes,
        Err(StorageError::InvalidKey(_)) => return Err(ServerError::Forbidden("link is invalid or expired")),
        Err(StorageError::Missing(_)) => return Err(ServerError::NotFound("file")),
        Err(err) => return Err(err.into()),
    };

    let file_name = key.rsplit('/').next().unwrap_or("file");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_of(&key))
        .header(
            header::CONTENT_DISPOSITION,
            format!("{}; filename=\"{file_name}\"", link.disposition.as_str()),
        )
        .body(Body::from(bytes))
        .map_err(|err| ServerError::internal("cannot build file response", err))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;

    use crate::app;
    use crate::router::tests::{harness, json, make_request, upload_request};

    #[tokio::test]
    async fn test_upload_preview_download() {
        let harness = harness();
        let alice = harness.employee("alice").await;
        let bob = harness.employee("bob").await;
        let app = app(harness.state.clone());
        let bearer = harness.bearer(&alice);

        let response = upload_request(
            app.clone(),
            "/uploads",
            &bearer,
            &[("docType", "driver_license")],
            "license.png",
            b"\x89PNG",
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let key = json(response).await["key"].as_str().unwrap().to_owned();
        assert_eq!(key, format!("users/{}/driver_license.png", alice.id));

        let response = make_request(
            app.clone(),
            Method::GET,
            &format!("/files/preview?key={key}"),
            Some(&harness.bearer(&bob)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app.clone(),
            Method::GET,
            &format!("/files/preview?key={key}&disposition=attachment"),
            Some(&bearer),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let url = json(response).await["url"].as_str().unwrap().to_owned();
        let path = url.trim_start_matches("http://localhost:8080");

        let response = make_request(app.clone(), Method::GET, path, None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"\x89PNG");

        let tampered = path.replace("signature=", "signature=00");
        let response = make_request(app, Method::GET, &tampered, None, None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
