use crate::config::{FcmConfig, PushConfig};
use compact_str::CompactString;
use kanau::processor::Processor;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub order_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    /// The device token is dead and should not be used again.
    Unregistered,
}

/// Best-effort device push.
#[derive(Debug, Clone)]
pub enum PushGateway {
    Disabled,
    Fcm(FcmClient),
}

impl PushGateway {
    pub fn from_config(config: &PushConfig) -> Result<Self, framework::Error> {
        match &config.fcm {
            Some(fcm) => Ok(PushGateway::Fcm(FcmClient::new(fcm)?)),
            None => Ok(PushGateway::Disabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, PushGateway::Fcm(_))
    }
}

impl Processor<PushMessage> for PushGateway {
    type Output = PushOutcome;
    type Error = framework::Error;
    async fn process(&self, input: PushMessage) -> Result<PushOutcome, framework::Error> {
        match self {
            PushGateway::Disabled => Ok(PushOutcome::Sent),
            PushGateway::Fcm(client) => client.process(input).await,
        }
    }
}

/// Client of the FCM HTTP (legacy) send endpoint.
#[derive(Debug, Clone)]
pub struct FcmClient {
    pub client: reqwest::Client,
    pub endpoint: CompactString,
    pub server_key: Arc<str>,
}

#[derive(Debug, serde::Serialize)]
struct FcmRequest<'a> {
    to: &'a str,
    notification: FcmNotification<'a>,
    data: FcmData,
}

#[derive(Debug, serde::Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct FcmData {
    #[serde(rename = "orderId", skip_serializing_if = "Option::is_none")]
    order_id: Option<i32>,
}

#[derive(Debug, serde::Deserialize)]
struct FcmResponse {
    #[serde(default)]
    failure: u32,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, serde::Deserialize)]
struct FcmResult {
    error: Option<String>,
}

impl FcmClient {
    pub fn new(config: &FcmConfig) -> Result<Self, framework::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| framework::Error::BusinessPanic(e.into()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.as_str().into(),
            server_key: config.server_key.as_str().into(),
        })
    }
}

impl Processor<PushMessage> for FcmClient {
    type Output = PushOutcome;
    type Error = framework::Error;
    #[instrument(skip_all, name = "FCM:Send", err)]
    async fn process(&self, input: PushMessage) -> Result<PushOutcome, framework::Error> {
        let request = FcmRequest {
            to: &input.token,
            notification: FcmNotification {
                title: &input.title,
                body: &input.body,
            },
            data: FcmData {
                order_id: input.order_id,
            },
        };
        let response = self
            .client
            .post(self.endpoint.as_str())
            .header(reqwest::header::AUTHORIZATION, format!("key={}", self.server_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| framework::Error::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(framework::Error::Upstream(format!(
                "FCM responded with {}",
                response.status()
            )));
        }
        let body: FcmResponse = response
            .json()
            .await
            .map_err(|e| framework::Error::Upstream(e.to_string()))?;
        if body.failure == 0 {
            return Ok(PushOutcome::Sent);
        }
        match body.results.iter().find_map(|r| r.error.as_deref()) {
            Some("NotRegistered" | "InvalidRegistration") => Ok(PushOutcome::Unregistered),
            Some(error) => Err(framework::Error::Upstream(error.to_owned())),
            None => Err(framework::Error::Upstream("FCM reported a failure".to_owned())),
        }
    }
}
