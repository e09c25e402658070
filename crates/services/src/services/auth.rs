//! Sign-up/sign-in through an external identity provider plus our own session tokens.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use db::models::user::UserDocument;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;

const IDENTITY_TOOLKIT_BASE: &str = "https://identitytoolkit.googleapis.com/v1";
const GOOGLE_PROVIDER_ID: &str = "google.com";
/// Identity Toolkit requires a request URI even for token-based IdP sign-in.
const IDP_REQUEST_URI: &str = "http://localhost";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    MissingFields(&'static str),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailExists,
    #[error("User profile not found")]
    ProfileNotFound,
    #[error("identity provider is not configured")]
    ProviderUnavailable,
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("invalid or expired session token")]
    InvalidToken,
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account returned by a federated (Google) sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpAccount {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// External account system; password flows return the provider's user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<String, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<String, AuthError>;
    /// Exchanges a Google ID token for the provider account behind it.
    async fn sign_in_with_idp(&self, google_id_token: &str) -> Result<IdpAccount, AuthError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Firebase Authentication via the Identity Toolkit REST API.
#[derive(Debug, Clone)]
pub struct FirebaseIdentity {
    http: Client,
    api_key: String,
    base_url: String,
}

impl FirebaseIdentity {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(api_key: String) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            base_url: IDENTITY_TOOLKIT_BASE.to_string(),
        })
    }

    async fn call<B, R>(&self, action: &str, body: &B) -> Result<R, AuthError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let res = self
            .http
            .post(format!("{}/accounts:{}", self.base_url, action))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        if res.status().is_success() {
            return res
                .json::<R>()
                .await
                .map_err(|e| AuthError::Provider(e.to_string()));
        }

        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let code = serde_json::from_str::<ProviderErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| format!("http {status}"));
        Err(map_provider_error(&code))
    }

    async fn password_call(
        &self,
        action: &str,
        email: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let res: PasswordResponse = self.call(action, &body).await?;
        Ok(res.local_id)
    }
}

/// Maps Identity Toolkit error codes (e.g. `EMAIL_EXISTS`, `INVALID_PASSWORD : ...`).
fn map_provider_error(code: &str) -> AuthError {
    let head = code.split([' ', ':']).next().unwrap_or(code);
    match head {
        "EMAIL_EXISTS" => AuthError::EmailExists,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED"
        | "INVALID_IDP_RESPONSE" => AuthError::InvalidCredentials,
        _ => AuthError::Provider(code.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<String, AuthError> {
        self.password_call("signUp", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<String, AuthError> {
        self.password_call("signInWithPassword", email, password)
            .await
    }

    async fn sign_in_with_idp(&self, google_id_token: &str) -> Result<IdpAccount, AuthError> {
        let body = IdpRequest {
            post_body: idp_post_body(google_id_token),
            request_uri: IDP_REQUEST_URI,
            return_idp_credential: true,
            return_secure_token: true,
        };
        let res: IdpResponse = self.call("signInWithIdp", &body).await?;
        Ok(IdpAccount {
            uid: res.local_id,
            email: res.email,
            display_name: res.display_name,
        })
    }
}

fn idp_post_body(google_id_token: &str) -> String {
    format!("id_token={google_id_token}&providerId={GOOGLE_PROVIDER_ID}")
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 session tokens carrying the user id.
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl SessionTokens {
    pub fn new(secret: &SecretString, ttl_hours: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            ttl: chrono::Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, uid: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: uid.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Returns the uid of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|_| AuthError::InvalidToken)
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct AuthSession {
    pub token: String,
    pub user: UserDocument,
}

#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    provider: Option<Arc<dyn IdentityProvider>>,
    tokens: Arc<SessionTokens>,
}

impl AuthService {
    pub fn new(
        pool: SqlitePool,
        provider: Option<Arc<dyn IdentityProvider>>,
        tokens: Arc<SessionTokens>,
    ) -> Self {
        if provider.is_none() {
            warn!("No identity provider configured - register/login will be unavailable");
        }
        Self {
            pool,
            provider,
            tokens,
        }
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    fn provider(&self) -> Result<&dyn IdentityProvider, AuthError> {
        self.provider.as_deref().ok_or(AuthError::ProviderUnavailable)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthSession, AuthError> {
        let email = request.email.trim();
        let name = request.name.trim();
        if email.is_empty() || request.password.is_empty() || name.is_empty() {
            return Err(AuthError::MissingFields("All fields are required"));
        }

        let uid = self.provider()?.sign_up(email, &request.password).await?;
        let user = UserDocument::create(&self.pool, &uid, email, name).await?;
        info!(uid = %uid, "Registered user");

        Ok(AuthSession {
            token: self.tokens.issue(&uid)?,
            user,
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthSession, AuthError> {
        let email = request.email.trim();
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::MissingFields("Email and password are required"));
        }

        let uid = self.provider()?.sign_in(email, &request.password).await?;
        let user = UserDocument::find_by_uid(&self.pool, &uid)
            .await?
            .ok_or(AuthError::ProfileNotFound)?;
        info!(uid = %uid, task_count = user.tasks.len(), "User logged in");

        Ok(AuthSession {
            token: self.tokens.issue(&uid)?,
            user,
        })
    }

    /// Signs in with a Google ID token. The first sign-in creates the user document.
    pub async fn login_with_google(
        &self,
        request: GoogleLoginRequest,
    ) -> Result<AuthSession, AuthError> {
        let id_token = request.id_token.trim();
        if id_token.is_empty() {
            return Err(AuthError::MissingFields("Google ID token is required"));
        }

        let account = self.provider()?.sign_in_with_idp(id_token).await?;
        let email = account.email.unwrap_or_default();
        let name = account
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| email.clone());
        let user = UserDocument::find_or_create(&self.pool, &account.uid, &email, &name)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => AuthError::EmailExists,
                _ => AuthError::Database(e),
            })?;
        info!(uid = %user.uid, task_count = user.tasks.len(), "User signed in with Google");

        Ok(AuthSession {
            token: self.tokens.issue(&user.uid)?,
            user,
        })
    }

    /// Sessions are stateless tokens; logging out is the client dropping its token.
    pub fn logout(&self) {}
}
