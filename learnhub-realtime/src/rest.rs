//! REST collaborator: mutation submission and history paging.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::models::{ApiEnvelope, MutationAck, MutationRequest, Page, Topic, TopicKind};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    credentials::CredentialProvider,
    error::{SyncError, SyncResult},
};

/// HTTP side of the realtime layer.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Submits a mutation. A successful response only acknowledges receipt.
    ///
    /// # Errors
    /// [`SyncError::Auth`] when the token is refused twice,
    /// [`SyncError::Rejected`] for any other failure.
    async fn submit(&self, topic: &Topic, request: &MutationRequest) -> SyncResult<MutationAck>;

    /// Fetches the page of items older than `before` (newest page when `None`).
    ///
    /// # Errors
    /// Same as [`RestClient::submit`].
    async fn load_page(&self, topic: &Topic, before: Option<&str>, limit: u32)
    -> SyncResult<Page>;
}

/// Relative endpoint for a mutation on `topic`.
///
/// # Errors
/// [`SyncError::Rejected`] when the topic kind has no such endpoint.
pub fn mutation_path(topic: &Topic, request: &MutationRequest) -> SyncResult<String> {
    let resource = || {
        topic
            .resource_id()
            .ok_or_else(|| SyncError::rejected(None, format!("topic {topic} has no resource id")))
    };
    match (request, topic.kind()) {
        (MutationRequest::Message(_), TopicKind::Conversation) => {
            Ok(format!("conversations/{}/messages", resource()?))
        }
        (MutationRequest::Answer(_), TopicKind::Question) => {
            Ok(format!("questions/{}/answers", resource()?))
        }
        (MutationRequest::Vote(_), _) => Ok("votes".to_string()),
        (MutationRequest::React(_), _) => Ok("reactions".to_string()),
        (_, kind) => Err(SyncError::rejected(
            None,
            format!("cannot post this mutation to a {} topic", kind.as_str()),
        )),
    }
}

/// Relative endpoint listing the items of `topic`.
///
/// # Errors
/// [`SyncError::Rejected`] for topics without a history endpoint.
pub fn history_path(topic: &Topic) -> SyncResult<String> {
    let resource = || {
        topic
            .resource_id()
            .ok_or_else(|| SyncError::rejected(None, format!("topic {topic} has no resource id")))
    };
    match topic.kind() {
        TopicKind::Conversation => Ok(format!("conversations/{}/messages", resource()?)),
        TopicKind::Question => Ok(format!("questions/{}/answers", resource()?)),
        TopicKind::Notifications => Ok("notifications".to_string()),
        TopicKind::Other => Err(SyncError::rejected(
            None,
            format!("topic {topic} has no history"),
        )),
    }
}

/// Bearer-authenticated client for the LearnHub JSON API.
#[derive(Clone)]
pub struct HttpRestClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for HttpRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRestClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpRestClient {
    /// Client with a default `reqwest` client.
    pub fn new(base_url: Url, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_client(Client::new(), base_url, credentials)
    }

    /// Client reusing `client`. A trailing `/` is added to `base_url` so endpoint
    /// paths join under it.
    pub fn with_client(
        client: Client,
        mut base_url: Url,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            credentials,
        }
    }

    fn api_url(&self, path: &str) -> SyncResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| SyncError::rejected(None, format!("invalid endpoint {path}: {err}")))
    }

    fn bearer(token: Option<String>) -> SyncResult<String> {
        token.ok_or_else(|| SyncError::auth("no credential available"))
    }

    /// Sends the request once and, on `401`, once more with a refreshed token.
    async fn send_with_refresh<F>(&self, build: F) -> SyncResult<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let token = Self::bearer(self.credentials.get_token().await)?;
        let response = build()
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| SyncError::rejected(None, err.to_string()))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("request unauthorized, refreshing credential");
        drop(response);
        let token = Self::bearer(self.credentials.refresh().await)?;
        let response = build()
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| SyncError::rejected(None, err.to_string()))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SyncError::auth("credential rejected by the API"));
        }
        Ok(response)
    }

    async fn read_envelope<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SyncError::rejected(Some(status.as_u16()), err.to_string()))?;

        match serde_json::from_str::<ApiEnvelope<T>>(&body) {
            Ok(envelope) if status.is_success() => envelope
                .into_result()
                .map_err(|err| SyncError::rejected(Some(status.as_u16()), err.to_string())),
            Ok(envelope) => Err(SyncError::rejected(
                Some(status.as_u16()),
                envelope
                    .message
                    .unwrap_or_else(|| format!("request failed with {status}")),
            )),
            Err(_) if !status.is_success() => Err(SyncError::rejected(
                Some(status.as_u16()),
                format!("request failed with {status}"),
            )),
            Err(err) => Err(SyncError::rejected(
                Some(status.as_u16()),
                format!("unexpected response body: {err}"),
            )),
        }
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    #[instrument(skip(self, topic, request), fields(topic = %topic, correlation_id = %request.correlation_id()))]
    async fn submit(&self, topic: &Topic, request: &MutationRequest) -> SyncResult<MutationAck> {
        let url = self.api_url(&mutation_path(topic, request)?)?;
        let response = self
            .send_with_refresh(|| self.client.post(url.clone()).json(request))
            .await?;
        Self::read_envelope(response).await
    }

    #[instrument(skip(self, topic), fields(topic = %topic))]
    async fn load_page(
        &self,
        topic: &Topic,
        before: Option<&str>,
        limit: u32,
    ) -> SyncResult<Page> {
        let mut url = self.api_url(&history_path(topic)?)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(before) = before {
                query.append_pair("before", before);
            }
            query.append_pair("limit", &limit.to_string());
        }
        let response = self
            .send_with_refresh(|| self.client.get(url.clone()))
            .await?;
        Self::read_envelope(response).await
    }
}

#[cfg(test)]
mod tests {
    use shared::models::{CorrelationId, LocalPayload};

    use super::*;
    use crate::credentials::StaticCredentials;

    fn request(payload: &LocalPayload) -> MutationRequest {
        MutationRequest::from_payload(CorrelationId::new(), payload)
    }

    #[test]
    fn mutation_endpoints_follow_topic_kind() {
        let message = request(&LocalPayload::Message { body: "hi".into() });
        assert_eq!(
            mutation_path(&Topic::conversation(42), &message).unwrap(),
            "conversations/42/messages"
        );
        assert!(mutation_path(&Topic::question(7), &message).is_err());

        let answer = request(&LocalPayload::Answer { body: "42".into() });
        assert_eq!(
            mutation_path(&Topic::question(7), &answer).unwrap(),
            "questions/7/answers"
        );

        let vote = request(&LocalPayload::Vote {
            entity_id: "q1".into(),
            delta: 1,
        });
        assert_eq!(mutation_path(&Topic::question(7), &vote).unwrap(), "votes");
    }

    #[test]
    fn history_endpoints_follow_topic_kind() {
        assert_eq!(
            history_path(&Topic::notifications("user9")).unwrap(),
            "notifications"
        );
        assert!(history_path(&Topic::new("presence")).is_err());
    }

    #[test]
    fn base_url_gets_a_trailing_slash() {
        let client = HttpRestClient::new(
            Url::parse("http://localhost:8080/api").unwrap(),
            Arc::new(StaticCredentials::new("token")),
        );
        assert_eq!(
            client.api_url("votes").unwrap().as_str(),
            "http://localhost:8080/api/votes"
        );
    }
}
