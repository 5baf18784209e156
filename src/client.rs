//! ApiClient
//!
//! Typed HTTP client for the Skill-Up API, used by integration tests and tooling.
//!
//! The access token lives only in memory. The refresh token is an HttpOnly cookie kept
//! by the `reqwest` cookie store and is never visible to this code. When a request comes
//! back 401, the client refreshes once and retries once.
//!
//! Refresh is single-flight. Every request remembers the token generation it was sent
//! with. On a 401 it takes the refresh gate; if the generation has moved on, another
//! request already refreshed and this one simply retries. Only the first caller per
//! generation talks to `/auth/refresh`.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Method, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, RwLock};

use crate::error::ErrorBody;
use crate::models::{AuthResponse, LoginRequest, RefreshResponse, RegisterRequest};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The refresh cookie is missing, expired or revoked. The user must sign in again.
    #[error("session expired, please sign in again")]
    SessionExpired,
    /// The API answered with an error envelope.
    #[error("{status} {code}: {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::SessionExpired => Some(StatusCode::UNAUTHORIZED),
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
    // Bumped every time the held token is replaced or dropped.
    generation: AtomicU64,
    refresh_gate: Mutex<()>,
}

/// Auth endpoints answer 401 for bad credentials; those never trigger a refresh.
fn is_auth_endpoint(path: &str) -> bool {
    matches!(
        path,
        "/auth/login" | "/auth/register" | "/auth/refresh" | "/auth/logout"
    )
}

impl ApiClient {
    /// `base_url` includes the version prefix, e.g. `http://localhost:5000/api/v1`.
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    async fn set_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<AuthResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self.post("/auth/login", &body).await?;
        self.set_token(Some(auth.access_token.clone())).await;
        Ok(auth)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> ClientResult<AuthResponse> {
        let body = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self.post("/auth/register", &body).await?;
        self.set_token(Some(auth.access_token.clone())).await;
        Ok(auth)
    }

    /// Revokes the server session and forgets the token, even if the server call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let result = self.http.post(self.url("/auth/logout")).send().await;
        self.set_token(None).await;
        result?;
        Ok(())
    }

    /// Forces a refresh now.
    pub async fn refresh(&self) -> ClientResult<()> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Must be called with the refresh gate held.
    async fn refresh_locked(&self) -> ClientResult<()> {
        let response = self.http.post(self.url("/auth/refresh")).send().await?;
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "refresh rejected");
            self.set_token(None).await;
            return Err(ClientError::SessionExpired);
        }
        match response.json::<RefreshResponse>().await {
            Ok(body) => {
                self.set_token(Some(body.access_token)).await;
                Ok(())
            }
            Err(e) => {
                self.set_token(None).await;
                Err(ClientError::Http(e))
            }
        }
    }

    /// Refreshes unless someone already did since `observed` was read.
    async fn refresh_after(&self, observed: u64) -> ClientResult<()> {
        let _gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::Acquire) != observed {
            return match self.access_token().await {
                Some(_) => Ok(()),
                None => Err(ClientError::SessionExpired),
            };
        }
        self.refresh_locked().await
    }

    async fn dispatch<B: Serialize + ?Sized>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<Response> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = self.access_token().await {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn send<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: Option<&B>) -> ClientResult<Response> {
        let observed = self.generation.load(Ordering::Acquire);
        let response = self.dispatch(&method, path, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED || is_auth_endpoint(path) {
            return Ok(response);
        }

        self.refresh_after(observed).await?;

        let retried = self.dispatch(&method, path, body).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            self.set_token(None).await;
            return Err(ClientError::SessionExpired);
        }
        Ok(retried)
    }

    async fn into_error(response: Response) -> ClientError {
        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(body) => ClientError::Api {
                status,
                code: body.error.code,
                message: body.error.message,
            },
            Err(_) => ClientError::Api {
                status,
                code: "UNKNOWN".to_string(),
                message: status.to_string(),
            },
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        if !response.status().is_success() {
            return Err(Self::into_error(response).await);
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        Self::json(self.send::<()>(Method::GET, path, None).await?).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        Self::json(self.send(Method::POST, path, Some(body)).await?).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        Self::json(self.send(Method::PUT, path, Some(body)).await?).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<()> {
        let response = self.send::<()>(Method::DELETE, path, None).await?;
        if !response.status().is_success() {
            return Err(Self::into_error(response).await);
        }
        Ok(())
    }
}
