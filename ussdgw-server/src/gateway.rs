//! Application backend gateway.
//!
//! Bridges an inbound message to the HTTP application and hands back its
//! reply. The gateway owns all transport policy; from the dispatcher's
//! point of view a query always yields a reply.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// A routed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRequest {
    /// Originating address (routing key).
    pub msisdn: String,
    /// User input text from the submit.
    pub input: String,
    /// Correlation id spanning the connection's exchanges.
    pub session_id: String,
}

/// The application's reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppReply {
    pub message: String,
    #[serde(rename = "endSession")]
    pub end_session: bool,
}

impl AppReply {
    /// Reply used when the application cannot be reached or returns
    /// something unreadable. Keeps the session alive.
    pub fn fallback() -> Self {
        Self {
            message: "Error processing request".to_string(),
            end_session: false,
        }
    }
}

/// Sends an inbound message to the application and yields its reply.
///
/// `query` never fails: implementations convert any transport or decode
/// problem into [`AppReply::fallback`].
#[async_trait]
pub trait ApplicationGateway: Send + Sync {
    async fn query(&self, request: &AppRequest) -> AppReply;
}

/// HTTP gateway performing `GET {base_url}{msisdn}/{input}/{session_id}`
/// and expecting a JSON object `{"message": ..., "endSession": ...}`.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ApplicationGateway for HttpGateway {
    async fn query(&self, request: &AppRequest) -> AppReply {
        let url = format!(
            "{}{}/{}/{}",
            self.base_url, request.msisdn, request.input, request.session_id
        );

        let result: Result<AppReply, reqwest::Error> = async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            response.json::<AppReply>().await
        }
        .await;

        match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("error sending to application: {}", e);
                AppReply::fallback()
            }
        }
    }
}
