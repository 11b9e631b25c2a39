//! REST transport for the live-class gateways.

use std::env;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use live_core::model::{
    ClassId, EmomMark, LeaderboardEntry, ParticipantProgress, Scaling, ScalingFilter, Session,
    UserId,
};
use live_core::sequencer::Direction;
use storage::gateway::{
    AdvanceOutcome, CoachGateway, GatewayError, LiveClassGateway, PartialOutcome, SessionSnapshot,
};

use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub base_url: String,
    pub token: String,
    pub user_id: UserId,
}

impl HttpConfig {
    /// | Env Var             | Required |
    /// |---------------------|----------|
    /// | `LIVE_API_BASE_URL` | yes      |
    /// | `LIVE_API_TOKEN`    | yes      |
    /// | `LIVE_USER_ID`      | yes      |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for unset variables and
    /// `ConfigError::NotANumber` for a malformed user id.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`HttpConfig::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// See [`HttpConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let base_url = required("LIVE_API_BASE_URL")?;
        let token = required("LIVE_API_TOKEN")?;
        let raw_user = required("LIVE_USER_ID")?;
        let user_id = raw_user.parse().map_err(|_| ConfigError::NotANumber {
            var: "LIVE_USER_ID",
            value: raw_user.clone(),
        })?;
        Ok(Self {
            base_url,
            token,
            user_id,
        })
    }
}

/// Both gateway traits over HTTP, authenticated with a bearer token.
#[derive(Clone)]
pub struct HttpLiveClassGateway {
    client: Client,
    config: HttpConfig,
}

impl HttpLiveClassGateway {
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// # Errors
    ///
    /// See [`HttpConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(HttpConfig::from_env()?))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .bearer_auth(&self.config.token)
    }

    fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.config.token)
            .json(body)
    }
}

//
// ─── WIRE ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    session: Option<Session>,
    server_now: i64,
}

#[derive(Debug, Serialize)]
struct AdvanceRequest {
    direction: Direction,
    seq: u64,
}

#[derive(Debug, Serialize)]
struct RepsRequest {
    reps: u32,
}

#[derive(Debug, Serialize)]
struct IntervalScoreRequest {
    step_index: u32,
    reps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
struct ScalingRequest {
    scaling: Scaling,
}

#[derive(Debug, Serialize)]
struct TotalRepsRequest {
    user_id: UserId,
    total_reps: u32,
}

#[derive(Debug, Serialize)]
struct CoachEmomMarkRequest {
    user_id: UserId,
    #[serde(flatten)]
    mark: EmomMark,
}

#[derive(Debug, Serialize)]
struct ForTimeFinishRequest {
    user_id: UserId,
    finish_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(default)]
    message: String,
    user_id: Option<UserId>,
}

async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GatewayError> {
    let response = send(request).await?;
    response.json().await.map_err(decode_error)
}

async fn execute(request: RequestBuilder) -> Result<(), GatewayError> {
    send(request).await.map(|_| ())
}

async fn send(request: RequestBuilder) -> Result<Response, GatewayError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody {
        code: None,
        message: text,
        user_id: None,
    });
    Err(status_error(status, Some(body)))
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

fn decode_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::Serialization(err.to_string())
    } else {
        transport_error(err)
    }
}

fn status_error(status: StatusCode, body: Option<ErrorBody>) -> GatewayError {
    let (code, message, user_id) = match body {
        Some(body) => (body.code, body.message, body.user_id),
        None => (None, String::new(), None),
    };
    match code.as_deref() {
        Some("NOT_LIVE") => GatewayError::NotLive,
        Some("TIME_UP") => GatewayError::TimeUp,
        Some("ALREADY_STARTED") => GatewayError::AlreadyStarted,
        Some("ALREADY_ENDED") => GatewayError::AlreadyEnded,
        Some("CLASS_SESSION_NOT_STARTED" | "SESSION_NOT_FOUND" | "NOT_STARTED") => {
            GatewayError::NotStarted
        }
        Some("NOT_BOOKED") => GatewayError::NotBooked(user_id.unwrap_or(UserId::new(0))),
        Some(other) if !status.is_server_error() => {
            GatewayError::Rejected(format!("{other}: {message}"))
        }
        _ if status == StatusCode::NOT_FOUND => GatewayError::NotFound,
        _ if status.is_server_error() => GatewayError::Transport(format!("server returned {status}")),
        _ => GatewayError::Rejected(format!("{status}: {message}")),
    }
}

//
// ─── TRAITS ────────────────────────────────────────────────────────────────────
//

#[async_trait]
impl LiveClassGateway for HttpLiveClassGateway {
    fn user_id(&self) -> UserId {
        self.config.user_id
    }

    async fn get_session(&self, class_id: ClassId) -> Result<Option<SessionSnapshot>, GatewayError> {
        let envelope: SessionEnvelope =
            fetch(self.get(&format!("live/{class_id}/session"))).await?;
        Ok(envelope.session.map(|session| SessionSnapshot {
            session,
            server_now: envelope.server_now,
        }))
    }

    async fn get_my_progress(&self, class_id: ClassId) -> Result<ParticipantProgress, GatewayError> {
        fetch(self.get(&format!("live/{class_id}/me"))).await
    }

    async fn advance(
        &self,
        class_id: ClassId,
        direction: Direction,
        seq: u64,
    ) -> Result<AdvanceOutcome, GatewayError> {
        let body = AdvanceRequest { direction, seq };
        fetch(self.post(&format!("live/{class_id}/advance"), &body))
            .await
    }

    async fn submit_partial(&self, class_id: ClassId, reps: u32) -> Result<PartialOutcome, GatewayError> {
        fetch(self.post(&format!("live/{class_id}/partial"), &RepsRequest { reps }))
            .await
    }

    async fn mark_emom_minute(&self, class_id: ClassId, mark: EmomMark) -> Result<(), GatewayError> {
        execute(self.post(&format!("live/{class_id}/emom/mark"), &mark))
            .await
    }

    async fn get_leaderboard(
        &self,
        class_id: ClassId,
        filter: ScalingFilter,
    ) -> Result<Vec<LeaderboardEntry>, GatewayError> {
        let request = self
            .get(&format!("live/{class_id}/leaderboard"))
            .query(&[("scaling", filter.as_str())]);
        fetch(request).await
    }

    async fn post_interval_score(
        &self,
        class_id: ClassId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError> {
        let body = IntervalScoreRequest {
            step_index,
            reps,
            user_id: None,
        };
        execute(self.post(&format!("live/{class_id}/interval/score"), &body))
            .await
    }

    async fn set_scaling(&self, class_id: ClassId, scaling: Scaling) -> Result<(), GatewayError> {
        execute(self.post(&format!("live/{class_id}/scaling"), &ScalingRequest { scaling }))
            .await
    }
}

#[async_trait]
impl CoachGateway for HttpLiveClassGateway {
    async fn start_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        fetch(self.post(&format!("coach/live/{class_id}/start"), &()))
            .await
    }

    async fn pause_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        fetch(self.post(&format!("coach/live/{class_id}/pause"), &()))
            .await
    }

    async fn resume_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        fetch(self.post(&format!("coach/live/{class_id}/resume"), &()))
            .await
    }

    async fn stop_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        fetch(self.post(&format!("coach/live/{class_id}/stop"), &()))
            .await
    }

    async fn set_amrap_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError> {
        let body = TotalRepsRequest {
            user_id,
            total_reps,
        };
        execute(self.post(&format!("coach/live/{class_id}/amrap/total"), &body))
            .await
    }

    async fn set_for_time_finish(
        &self,
        class_id: ClassId,
        user_id: UserId,
        finish_seconds: Option<i64>,
    ) -> Result<(), GatewayError> {
        let body = ForTimeFinishRequest {
            user_id,
            finish_seconds,
        };
        execute(self.post(&format!("coach/live/{class_id}/for-time/finish"), &body))
            .await
    }

    async fn set_for_time_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError> {
        let body = TotalRepsRequest {
            user_id,
            total_reps,
        };
        execute(self.post(&format!("coach/live/{class_id}/for-time/total"), &body))
            .await
    }

    async fn set_emom_mark(
        &self,
        class_id: ClassId,
        user_id: UserId,
        mark: EmomMark,
    ) -> Result<(), GatewayError> {
        let body = CoachEmomMarkRequest { user_id, mark };
        execute(self.post(&format!("coach/live/{class_id}/emom/mark"), &body))
            .await
    }

    async fn post_interval_score_for(
        &self,
        class_id: ClassId,
        user_id: UserId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError> {
        let body = IntervalScoreRequest {
            step_index,
            reps,
            user_id: Some(user_id),
        };
        execute(self.post(&format!("coach/live/{class_id}/interval/score"), &body))
            .await
    }
}
