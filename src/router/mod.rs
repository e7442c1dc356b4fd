//! HTTP surface.
mod auth;
mod employees;
mod files;
mod housing;
mod onboarding;
mod reports;
mod status;
mod tokens;
mod visa;

use std::sync::LazyLock;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request};
use axum::routing::{get, post, put};
use axum::{Json, Router, middleware as AxumMiddleware};
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::middleware;
use crate::workflow::uploads::{MAX_UPLOAD_SIZE, Upload};
use crate::{AppState, ServerError};

static USERNAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").ok());

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Letters, digits and `_ . -` only.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if USERNAME.as_ref().is_some_and(|re| re.is_match(username)) {
        Ok(())
    } else {
        Err(ValidationError::new("username"))
    }
}

/// At least one uppercase letter, one lowercase letter and one digit.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());

    if upper && lower && digit {
        Ok(())
    } else {
        Err(ValidationError::new("password"))
    }
}

/// Text fields and the single `file` part of a multipart form.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: Vec<(String, String)>,
    file: Option<Upload>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_owned();
            if name == "file" {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let bytes = field.bytes().await?;
                form.file = Some(Upload { file_name, bytes });
            } else {
                let value = field.text().await?;
                form.fields.push((name, value));
            }
        }

        Ok(form)
    }

    pub fn field(&self, name: &'static str) -> Result<&str, ServerError> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ServerError::field(name, "required", "Field is required."))
    }

    pub fn file(self) -> Result<Upload, ServerError> {
        self.file
            .ok_or_else(|| ServerError::field("file", "required", "A file is required."))
    }
}

/// Every route, wired to its access guard.
pub fn routes(state: AppState) -> Router {
    let authenticate = AxumMiddleware::from_fn_with_state(state.clone(), middleware::authenticate);
    // Multipart framing on top of the largest accepted file.
    let upload_limit = DefaultBodyLimit::max(MAX_UPLOAD_SIZE + 64 * 1024);

    let authenticated = Router::new()
        .route("/files/preview", get(files::preview))
        .route("/housing/reports/{id}", get(reports::get).patch(reports::update_status))
        .route("/housing/reports/{id}/comments", get(reports::comments).post(reports::add_comment))
        .route("/housing/reports/{id}/comments/{comment_id}", put(reports::update_comment))
        .route_layer(authenticate.clone());

    let employee = Router::new()
        .route(
            "/onboarding",
            get(onboarding::view)
                .post(onboarding::submit)
                .put(onboarding::resubmit),
        )
        .route("/uploads", post(files::upload).layer(upload_limit.clone()))
        .route_layer(AxumMiddleware::from_fn(middleware::employee_only))
        .route_layer(authenticate.clone());

    let approved = Router::new()
        .route("/employees/me", get(employees::me).put(employees::update_me))
        .route("/housing/me", get(housing::mine))
        .route("/housing/reports", get(reports::list_mine).post(reports::create))
        .route_layer(AxumMiddleware::from_fn(middleware::approved_employee))
        .route_layer(authenticate.clone());

    let visa = Router::new()
        .route("/visa/status", get(visa::status))
        .route("/visa/documents", post(visa::submit).layer(upload_limit))
        .route_layer(AxumMiddleware::from_fn_with_state(state.clone(), middleware::visa_case))
        .route_layer(authenticate.clone());

    let hr = Router::new()
        .route("/tokens", get(tokens::history).post(tokens::issue))
        .route("/onboarding", get(onboarding::list))
        .route("/onboarding/{id}", get(onboarding::detail))
        .route("/onboarding/{id}/approve", post(onboarding::approve))
        .route("/onboarding/{id}/reject", post(onboarding::reject))
        .route("/visa/pending", get(visa::pending))
        .route("/visa/all", get(visa::all))
        .route("/visa/documents/{id}/review", post(visa::review))
        .route("/visa/{user_id}/notify", post(visa::notify))
        .route("/employees", get(employees::directory))
        .route("/employees/{id}", get(employees::find))
        .route("/housing", get(housing::list).post(housing::create))
        .route("/housing/{id}", get(housing::details))
        .route("/housing/{id}/reports", get(reports::list_for_house))
        .route_layer(AxumMiddleware::from_fn(middleware::hr_only))
        .route_layer(authenticate);

    Router::new()
        .route("/health", get(status::health))
        .route("/status.json", get(status::status))
        .route("/tokens/validate", get(tokens::validate))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/files/{*key}", get(files::download))
        .merge(authenticated)
        .merge(employee)
        .merge(approved)
        .merge(visa)
        .nest("/hr", hr)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Response, header};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::config::{Argon2, Configuration};
    use crate::crypto::{Crypto, Signer};
    use crate::database::{
        AccountStore, Database, Guarded, MemoryStore, OnboardingStore, ProfileStore, Transition,
    };
    use crate::mail::tests::RecordingMailer;
    use crate::model::{
        Account, EmployeeProfile, House, OnboardingApplication, OnboardingStatus, ReviewStatus,
        WorkAuthorizationType,
    };
    use crate::storage::LocalStorage;
    use crate::token::TokenManager;
    use crate::workflow::{housing, onboarding};

    pub const PASSWORD: &str = "Secret123";

    /// In-memory application with observable side effects.
    pub struct Harness {
        pub state: AppState,
        pub mail: Arc<RecordingMailer>,
        pub clock: Arc<FixedClock>,
        _dir: TempDir,
    }

    pub fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mail = Arc::new(RecordingMailer::default());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let crypto = Crypto::new(Some(Argon2 {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap();

        let state = AppState {
            config: Arc::new(Configuration::default()),
            db: Database::from_store(MemoryStore::default()),
            crypto: Arc::new(crypto),
            token: TokenManager::new("hiregate", b"test-secret"),
            mail: mail.clone(),
            storage: Arc::new(LocalStorage::new(
                dir.path(),
                "http://localhost:8080",
                Signer::new("secret").unwrap(),
            )),
            clock: clock.clone(),
        };

        Harness {
            state,
            mail,
            clock,
            _dir: dir,
        }
    }

    impl Harness {
        fn now(&self) -> chrono::DateTime<Utc> {
            self.state.clock.now()
        }

        /// Object keys currently stored for one account.
        pub fn files(&self, user_id: uuid::Uuid) -> std::collections::BTreeSet<String> {
            let prefix = format!("users/{user_id}");
            match std::fs::read_dir(self._dir.path().join(&prefix)) {
                Ok(entries) => entries
                    .map(|entry| format!("{prefix}/{}", entry.unwrap().file_name().to_string_lossy()))
                    .collect(),
                Err(_) => Default::default(),
            }
        }

        pub fn read(&self, key: &str) -> Option<Vec<u8>> {
            std::fs::read(self._dir.path().join(key)).ok()
        }

        pub async fn hr(&self) -> Account {
            let hash = self.state.crypto.pwd.hash_password(PASSWORD).unwrap();
            let account = Account::hr("hr", "hr@x.com", hash, self.now());
            self.state.db.insert_account(&account, None).await.unwrap();
            account
        }

        /// Registered employee with a placeholder profile.
        pub async fn employee(&self, username: &str) -> Account {
            let hash = self.state.crypto.pwd.hash_password(PASSWORD).unwrap();
            let account = Account::employee(username, format!("{username}@x.com"), hash, self.now());
            let profile = EmployeeProfile::placeholder(account.id, self.now());
            self.state
                .db
                .insert_account(&account, Some(&profile))
                .await
                .unwrap();
            account
        }

        /// Pending application built from the reference onboarding form.
        pub async fn submitted_application(&self, account: &Account) -> OnboardingApplication {
            self.submit(account, WorkAuthorizationType::Citizen).await
        }

        async fn submit(&self, account: &Account, kind: WorkAuthorizationType) -> OnboardingApplication {
            let form = onboarding::tests::form(kind);
            let snapshot = serde_json::to_value(&form).unwrap();
            let data = form.normalize(account.id, self.now()).unwrap();
            let application = OnboardingApplication::submitted(account.id, snapshot, self.now());

            match self
                .state
                .db
                .submit_application(&data, &application, &[OnboardingStatus::NotStarted])
                .await
                .unwrap()
            {
                Guarded::Applied(application) => application,
                Guarded::Refused(status) => panic!("submission refused while {status}"),
            }
        }

        /// Approved F1 CPT/OPT employee, with their profile.
        pub async fn opt_employee(&self, username: &str) -> (Account, EmployeeProfile) {
            let account = self.employee(username).await;
            let application = self.submit(&account, WorkAuthorizationType::F1CptOpt).await;

            let transition = Transition {
                id: application.id,
                to: ReviewStatus::Approved,
                feedback: String::new(),
                reviewed_by: uuid::Uuid::nil(),
                reviewed_at: self.now(),
            };
            assert!(matches!(
                self.state.db.review_application(&transition).await.unwrap(),
                Guarded::Applied(_)
            ));

            let account = self.account(account.id).await;
            let profile = self
                .state
                .db
                .find_profile_by_user(account.id)
                .await
                .unwrap()
                .unwrap();
            (account, profile)
        }

        pub async fn account(&self, id: uuid::Uuid) -> Account {
            self.state.db.find_account(id).await.unwrap().unwrap()
        }

        pub fn house_form(&self) -> housing::NewHouse {
            serde_json::from_value(serde_json::json!({
                "address": {
                    "street": "12 Elm St",
                    "city": "Springfield",
                    "state": "IL",
                    "zip": "62701"
                },
                "landlord": {
                    "fullName": "Jane Doe",
                    "phone": "555-111-2222",
                    "email": "jane@landlord.com"
                },
                "facility": { "bedrooms": 4, "bathrooms": 2, "mattresses": 4, "tables": 1, "chairs": 4 },
                "description": "Four bedrooms."
            }))
            .unwrap()
        }

        /// Active house.
        pub async fn house(&self) -> House {
            housing::create(&self.state, self.house_form()).await.unwrap()
        }

        pub fn bearer(&self, account: &Account) -> String {
            let token = self.state.token.create(account, self.now()).unwrap();
            format!("Bearer {token}")
        }
    }

    /// MUST NEVER be used in production.
    pub async fn make_request(
        app: Router,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut request = axum::extract::Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(bearer) = bearer {
            request = request.header(header::AUTHORIZATION, bearer);
        }

        let body = body.map(|b| b.to_string()).unwrap_or_default();
        app.oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    /// Single-file multipart request.
    pub async fn upload_request(
        app: Router,
        path: &str,
        bearer: &str,
        fields: &[(&str, &str)],
        file_name: &str,
        content: &[u8],
    ) -> Response<Body> {
        const BOUNDARY: &str = "hiregate-boundary";

        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        app.oneshot(
            axum::extract::Request::builder()
                .method(Method::POST)
                .uri(path)
                .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
                .header(header::AUTHORIZATION, bearer)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    pub async fn json(response: Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Secret123").is_ok());
        assert!(validate_password("secret123").is_err());
        assert!(validate_password("SECRET123").is_err());
        assert!(validate_password("SecretOnly").is_err());
        assert!(validate_username("alice.b-2").is_ok());
        assert!(validate_username("alice b").is_err());
    }
}
