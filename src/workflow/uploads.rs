//! Uploaded files: type and size checks, object keys and preview links.

use std::time::Duration;

use axum::body::Bytes;
use uuid::Uuid;

use crate::AppState;
use crate::database::ProfileStore;
use crate::error::{Result, ServerError};
use crate::model::{Account, labeled_enum};
use crate::storage::{Disposition, StoredObject, content_type_of};

/// Largest accepted file, 5 MiB.
pub const MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;
/// Lifetime of preview links.
pub const PREVIEW_TTL: Duration = Duration::from_secs(300);

labeled_enum! {
    /// Personal documents attached to a profile.
    pub enum ProfileDocument {
        ProfilePicture => "profile_picture",
        DriverLicense => "driver_license",
    }
}

/// File received from a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

impl Upload {
    /// Normalized extension, if the file is an accepted type and size.
    pub fn checked_extension(&self) -> Result<&'static str> {
        if self.bytes.is_empty() {
            return Err(ServerError::field("file", "required", "File is empty."));
        }
        if self.bytes.len() > MAX_UPLOAD_SIZE {
            return Err(ServerError::field("file", "size", "File must not exceed 5 MiB."));
        }

        let extension = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("pdf") => Ok("pdf"),
            Some("png") => Ok("png"),
            Some("jpg" | "jpeg") => Ok("jpg"),
            _ => Err(ServerError::field(
                "file",
                "file_type",
                "Only PDF, JPEG and PNG files are accepted.",
            )),
        }
    }
}

/// Prefix owning every object of an account.
pub fn user_prefix(user_id: Uuid) -> String {
    format!("users/{user_id}/")
}

/// Fixed key per (account, slot); a new upload replaces the previous file.
pub fn object_key(user_id: Uuid, slot: &str, extension: &str) -> String {
    format!("{}{slot}.{extension}", user_prefix(user_id))
}

/// Fresh key per upload, so a stored file is never replaced underneath the
/// record pointing at it.
pub fn revision_key(user_id: Uuid, slot: &str, extension: &str) -> String {
    format!("{}{slot}-{}.{extension}", user_prefix(user_id), Uuid::new_v4().simple())
}

pub fn owns_key(user_id: Uuid, key: &str) -> bool {
    key.starts_with(&user_prefix(user_id)) && !key.contains("..")
}

async fn put(state: &AppState, user_id: Uuid, key: String, upload: Upload) -> Result<StoredObject> {
    let size = upload.bytes.len();
    let stored = state
        .storage
        .put(upload.bytes, &key, content_type_of(&key))
        .await?;

    tracing::info!(%user_id, key, size, "file uploaded");

    Ok(stored)
}

/// Check and store `upload` in the account's `slot`.
pub async fn store(state: &AppState, user_id: Uuid, slot: &str, upload: Upload) -> Result<StoredObject> {
    let extension = upload.checked_extension()?;
    put(state, user_id, object_key(user_id, slot, extension), upload).await
}

/// Check and store `upload` as a new revision of the account's `slot`.
pub async fn store_revision(state: &AppState, user_id: Uuid, slot: &str, upload: Upload) -> Result<StoredObject> {
    let extension = upload.checked_extension()?;
    put(state, user_id, revision_key(user_id, slot, extension), upload).await
}

/// Best-effort removal of a file no record points at anymore.
pub async fn discard(state: &AppState, key: &str) {
    if let Err(err) = state.storage.delete(key).await {
        tracing::warn!(key, %err, "stale file not removed");
    }
}

/// Store a personal document and record its key on the profile.
pub async fn upload_profile_document(
    state: &AppState,
    account: &Account,
    kind: ProfileDocument,
    upload: Upload,
) -> Result<StoredObject> {
    if state.db.find_profile_by_user(account.id).await?.is_none() {
        return Err(ServerError::NotFound("profile"));
    }

    let stored = store(state, account.id, kind.as_str(), upload).await?;

    let key = stored.key.clone();
    let now = state.clock.now();
    state
        .db
        .modify_profile(
            account.id,
            Box::new(move |profile| {
                match kind {
                    ProfileDocument::ProfilePicture => profile.profile_picture_key = Some(key),
                    ProfileDocument::DriverLicense => profile.driver_license_key = Some(key),
                }
                profile.updated_at = now;
            }),
        )
        .await?
        .ok_or(ServerError::NotFound("profile"))?;

    Ok(stored)
}

/// Presigned read link. Employees may only preview their own files.
pub fn preview(state: &AppState, actor: &Account, key: &str, disposition: Disposition) -> Result<String> {
    if !actor.is_hr() && !owns_key(actor.id, key) {
        return Err(ServerError::Forbidden("you can only preview your own files"));
    }

    Ok(state
        .storage
        .presigned_get_url(key, PREVIEW_TTL, disposition, state.clock.now())?)
}
