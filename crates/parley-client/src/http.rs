//! HTTP implementations of the collaborator ports.
//!
//! Wire layout (all JSON):
//!   POST {base}/sessions/{id}/stream        body {"content": ...}, NDJSON response body
//!   GET  {base}/sessions/{id}/messages      -> [MessageSnapshot]
//!   POST {base}/approvals/{id}/approve      204 on acceptance
//!   POST {base}/approvals/{id}/reject       204 on acceptance

use async_trait::async_trait;
use futures_util::StreamExt;
use parley_protocol::{
    ApprovalDecision, ApprovalId, ApprovalPort, HistoryPort, MessageSnapshot, ProtocolError,
    ProtocolResult, SessionId, TurnByteStream, TurnTransport,
};
use parley_transcript::Session;
use serde_json::json;
use tracing::instrument;

/// One reqwest client serving all three ports.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: String,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Create a fresh session on the backend.
    pub async fn create_session(&self, title: &str) -> ProtocolResult<Session> {
        self.http
            .post(self.url("/sessions"))
            .json(&json!({ "title": title }))
            .send()
            .await
            .map_err(connection_error)?
            .error_for_status()
            .map_err(connection_error)?
            .json()
            .await
            .map_err(|err| ProtocolError::Decode(err.to_string()))
    }
}

fn connection_error(err: reqwest::Error) -> ProtocolError {
    ProtocolError::Connection(err.to_string())
}

#[async_trait]
impl TurnTransport for HttpBackend {
    #[instrument(skip(self, content), fields(session = %session_id))]
    async fn open_turn(
        &self,
        session_id: &SessionId,
        content: &str,
    ) -> ProtocolResult<TurnByteStream> {
        let response = self
            .http
            .post(self.url(&format!("/sessions/{session_id}/stream")))
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(connection_error)?
            .error_for_status()
            .map_err(connection_error)?;

        let stream = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(err) => Err(connection_error(err)),
            })
            .boxed();
        Ok(stream)
    }
}

#[async_trait]
impl HistoryPort for HttpBackend {
    #[instrument(skip(self), fields(session = %session_id))]
    async fn fetch_messages(
        &self,
        session_id: &SessionId,
    ) -> ProtocolResult<Vec<MessageSnapshot>> {
        self.http
            .get(self.url(&format!("/sessions/{session_id}/messages")))
            .send()
            .await
            .map_err(connection_error)?
            .error_for_status()
            .map_err(connection_error)?
            .json()
            .await
            .map_err(|err| ProtocolError::Decode(err.to_string()))
    }
}

#[async_trait]
impl ApprovalPort for HttpBackend {
    #[instrument(skip(self), fields(approval = %approval_id))]
    async fn submit_decision(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
    ) -> ProtocolResult<()> {
        let action = match decision {
            ApprovalDecision::Approved => "approve",
            ApprovalDecision::Rejected => "reject",
        };
        let response = self
            .http
            .post(self.url(&format!("/approvals/{approval_id}/{action}")))
            .send()
            .await
            .map_err(connection_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        // The server refuses late or duplicate decisions with a reason body.
        let status = response.status();
        let reason = response.text().await.unwrap_or_default();
        Err(ProtocolError::ApprovalDecision(format!(
            "{status}: {reason}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let backend = HttpBackend::new("http://localhost:8080/");
        assert_eq!(
            backend.url("/sessions/s1/messages"),
            "http://localhost:8080/sessions/s1/messages"
        );
    }
}
