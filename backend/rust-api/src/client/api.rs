use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::error::{ClientError, ErrorBody};
use crate::models::answer::{SubmitAnswersRequest, SubmitAnswersResponse, SubmitGuestAnswersRequest};
use crate::models::live_quiz::{CreateLiveQuizRequest, ScheduleRequest};
use crate::models::{Participant, SessionSnapshot};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// REST surface the client components depend on.
#[async_trait]
pub trait LiveQuizApi: Send + Sync {
    async fn get(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError>;
    async fn start(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError>;
    async fn end(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError>;
    async fn schedule(&self, quiz_id: &str, window: &ScheduleRequest) -> Result<SessionSnapshot, ClientError>;
    async fn cancel_schedule(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError>;
    async fn submit_answers(&self, req: &SubmitAnswersRequest) -> Result<SubmitAnswersResponse, ClientError>;
    async fn submit_guest_answers(
        &self,
        req: &SubmitGuestAnswersRequest,
    ) -> Result<SubmitAnswersResponse, ClientError>;
}

pub struct HttpLiveQuizApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
    read_retry: RetryConfig,
}

impl HttpLiveQuizApi {
    /// `base_url` is the server root, e.g. `http://localhost:8081`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("invalid server URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Transport(format!("invalid server URL {}", base_url)));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: None,
            read_retry: RetryConfig::default(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// URL of the realtime endpoint on the same server.
    pub fn realtime_url(&self) -> Result<Url, ClientError> {
        let mut url = self.endpoint(&["realtime"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Transport(format!("cannot derive websocket URL from {}", url)))?;
        Ok(url)
    }

    pub async fn create(&self, req: &CreateLiveQuizRequest) -> Result<SessionSnapshot, ClientError> {
        let url = self.endpoint(&["live-quizzes"])?;
        self.send(self.request(Method::POST, url).json(req)).await
    }

    pub async fn list(&self, department_id: Option<&str>) -> Result<Vec<SessionSnapshot>, ClientError> {
        let mut url = self.endpoint(&["live-quizzes"])?;
        if let Some(department_id) = department_id {
            url.query_pairs_mut().append_pair("departmentId", department_id);
        }
        self.read(url).await
    }

    pub async fn roster(&self, quiz_id: &str) -> Result<Vec<Participant>, ClientError> {
        let url = self.endpoint(&["live-quizzes", quiz_id, "roster"])?;
        let body: Value = self.read(url).await?;
        serde_json::from_value(body["participants"].clone())
            .map_err(|e| ClientError::Transport(format!("unexpected roster payload: {}", e)))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("invalid server URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // GETs are idempotent, so transport failures are retried.
    async fn read<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        retry_async_with_config(&self.read_retry, ClientError::is_retryable, || {
            self.send(self.request(Method::GET, url.clone()))
        })
        .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Transport(format!("unexpected response body: {}", e)));
        }

        let body = response.json::<ErrorBody>().await.unwrap_or_default();
        let err = ClientError::from_response(status, body);
        tracing::debug!(status = status.as_u16(), error = %err, "Live quiz request failed");
        Err(err)
    }

    async fn command(&self, quiz_id: &str, action: &str) -> Result<SessionSnapshot, ClientError> {
        let url = self.endpoint(&["live-quizzes", quiz_id, action])?;
        self.send(self.request(Method::POST, url)).await
    }
}

#[async_trait]
impl LiveQuizApi for HttpLiveQuizApi {
    async fn get(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError> {
        let url = self.endpoint(&["live-quizzes", quiz_id])?;
        self.read(url).await
    }

    async fn start(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError> {
        self.command(quiz_id, "start").await
    }

    async fn end(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError> {
        self.command(quiz_id, "end").await
    }

    async fn schedule(&self, quiz_id: &str, window: &ScheduleRequest) -> Result<SessionSnapshot, ClientError> {
        let url = self.endpoint(&["live-quizzes", quiz_id, "schedule"])?;
        self.send(self.request(Method::POST, url).json(window)).await
    }

    async fn cancel_schedule(&self, quiz_id: &str) -> Result<SessionSnapshot, ClientError> {
        self.command(quiz_id, "cancel-schedule").await
    }

    async fn submit_answers(&self, req: &SubmitAnswersRequest) -> Result<SubmitAnswersResponse, ClientError> {
        let url = self.endpoint(&["live-quiz-answers", "submit-multiple"])?;
        self.send(self.request(Method::POST, url).json(req)).await
    }

    async fn submit_guest_answers(
        &self,
        req: &SubmitGuestAnswersRequest,
    ) -> Result<SubmitAnswersResponse, ClientError> {
        let url = self.endpoint(&["live-quiz-answers", "submit-multiple-guest"])?;
        self.send(self.request(Method::POST, url).json(req)).await
    }
}
