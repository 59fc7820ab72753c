// One-shot authenticated REST actions against the collaboration
// backend.
//
// These complement the live socket: vote lifecycle, moderation, draft
// access, lobby/session control, operation history. Every call is
// independent and stateless from the connection controller's
// perspective; none of the live-socket invariants apply here.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use fresco_common::types::{
    CreateSessionParams, CreatedSession, DraftResponse, SessionDetails, UserSessions,
};

use crate::auth::store::CredentialStore;
use crate::auth::token::AuthApi;
use crate::config::ClientConfig;
use crate::error::{ApiError, AuthError};

/// Most session payloads arrive wrapped as `{ "session": { ... } }`.
#[derive(Debug, Deserialize)]
struct SessionEnvelope<S> {
    session: S,
}

#[derive(Debug, Deserialize, Default)]
struct OperationHistory {
    #[serde(default)]
    operations: Vec<Value>,
}

/// Stateless REST client carrying the bearer token on every call.
pub struct CollabApi {
    http: reqwest::Client,
    api_base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl CollabApi {
    pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn access_token(&self) -> Result<String, ApiError> {
        let tokens = self.credentials.load()?.ok_or(ApiError::NotAuthenticated)?;
        Ok(tokens.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let token = self.access_token()?;
        let response = self.http.get(self.url(path)).bearer_auth(token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let token = self.access_token()?;
        let response =
            self.http.post(self.url(path)).bearer_auth(token).json(body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status: status.as_u16(), message })
    }

    // ── Session lifecycle ──────────────────────────────────────────

    pub async fn create_session(
        &self,
        params: &CreateSessionParams,
    ) -> Result<CreatedSession, ApiError> {
        let envelope: SessionEnvelope<CreatedSession> =
            self.post("/collaborate/create/", params).await?;
        Ok(envelope.session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionDetails, ApiError> {
        let envelope: SessionEnvelope<SessionDetails> =
            self.get(&format!("/collaborate/{session_id}/")).await?;
        Ok(envelope.session)
    }

    /// Join with a human-entered code; case-insensitive on our side.
    pub async fn join_by_code(&self, join_code: &str) -> Result<SessionDetails, ApiError> {
        let body = json!({ "join_code": join_code.to_uppercase() });
        let envelope: SessionEnvelope<SessionDetails> =
            self.post("/collaborate/join-by-code/", &body).await?;
        Ok(envelope.session)
    }

    /// Host only: deactivate the session and notify all participants.
    pub async fn end_session(&self, session_id: &str) -> Result<Value, ApiError> {
        self.post(&format!("/collaborate/{session_id}/end/"), &json!({})).await
    }

    /// Host only: stop admitting participants.
    pub async fn close_lobby(&self, session_id: &str) -> Result<Value, ApiError> {
        self.post(&format!("/collaborate/{session_id}/lobby/close/"), &json!({})).await
    }

    pub async fn list_user_sessions(&self) -> Result<UserSessions, ApiError> {
        self.get("/collaborate/sessions/user/").await
    }

    pub async fn get_presence(&self, session_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/collaborate/{session_id}/presence/")).await
    }

    // ── Voting ─────────────────────────────────────────────────────

    /// Start a save vote among the participants.
    pub async fn initiate_vote(&self, session_id: &str) -> Result<Value, ApiError> {
        self.post(&format!("/collaborate/{session_id}/vote/"), &json!({})).await
    }

    pub async fn cast_vote(
        &self,
        session_id: &str,
        vote_id: &str,
        agree: bool,
    ) -> Result<Value, ApiError> {
        let body = json!({ "vote_id": vote_id, "agree": agree });
        self.post(&format!("/collaborate/{session_id}/vote/cast/"), &body).await
    }

    // ── Moderation ─────────────────────────────────────────────────

    /// Host only: remove a participant via REST (works even when the
    /// target's socket is wedged).
    pub async fn kick_participant(
        &self,
        session_id: &str,
        user_id: i64,
    ) -> Result<Value, ApiError> {
        let body = json!({ "user_id": user_id });
        self.post(&format!("/collaborate/{session_id}/kick/"), &body).await
    }

    // ── Draft access ───────────────────────────────────────────────

    pub async fn get_draft(&self, session_id: &str) -> Result<DraftResponse, ApiError> {
        self.get(&format!("/collaborate/{session_id}/draft/")).await
    }

    pub async fn update_draft(
        &self,
        session_id: &str,
        story_draft: &Value,
    ) -> Result<DraftResponse, ApiError> {
        let body = json!({ "story_draft": story_draft });
        self.post(&format!("/collaborate/{session_id}/draft/update/"), &body).await
    }

    // ── Published stories ──────────────────────────────────────────

    /// Stories produced by collaborative sessions the user was part of.
    pub async fn get_collaborative_stories(&self) -> Result<Value, ApiError> {
        self.get("/collaborate/stories/").await
    }

    /// Publish a finished collaborative story. Any participant may
    /// publish; the backend reports who got there first.
    pub async fn publish_collaborative_story(&self, story_id: i64) -> Result<Value, ApiError> {
        self.post(&format!("/stories/{story_id}/publish-collaborative/"), &json!({})).await
    }

    // ── Operation history ──────────────────────────────────────────

    /// Server-retained operation log, for late joiners and reconnection
    /// recovery; optionally scoped to one page.
    pub async fn operation_history(
        &self,
        session_id: &str,
        page_number: Option<u32>,
    ) -> Result<Vec<Value>, ApiError> {
        let path = match page_number {
            Some(page_number) => {
                format!("/collaborate/{session_id}/operations/?page_number={page_number}")
            }
            None => format!("/collaborate/{session_id}/operations/"),
        };
        let history: OperationHistory = self.get(&path).await?;
        Ok(history.operations)
    }
}

// ── Auth endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

/// Production refresh endpoint: `POST /auth/token/refresh/`.
///
/// A 401 means the refresh credential itself was rejected and maps to
/// [`AuthError::AuthRequired`]; everything else (offline, 5xx) is
/// transient and must not cost the user their credentials.
pub struct RestAuthApi {
    http: reqwest::Client,
    refresh_url: String,
}

impl RestAuthApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            refresh_url: format!(
                "{}/auth/token/refresh/",
                config.api_base_url.trim_end_matches('/')
            ),
        }
    }
}

impl AuthApi for RestAuthApi {
    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .json(&json!({ "refresh": refresh_token }))
            .send()
            .await
            .map_err(|error| AuthError::Network(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::AuthRequired);
        }
        if !status.is_success() {
            return Err(AuthError::Network(format!("refresh endpoint answered {status}")));
        }

        let body: RefreshResponse =
            response.json().await.map_err(|error| AuthError::Network(error.to_string()))?;
        Ok(body.access)
    }
}
