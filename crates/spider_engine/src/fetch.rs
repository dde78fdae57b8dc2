use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, USER_AGENT};

use crate::{EngineEvent, FailureKind, FetchError};

/// Body of a media response, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Applies to the initial request only; bodies stream without a deadline.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: std::sync::mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: std::sync::mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Announced body size, `None` when the server does not say.
    async fn probe_size(&self, url: &str) -> Result<Option<u64>, FetchError>;

    /// Starts a GET and hands back its body stream once a 200 arrived.
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn parse(url: &str) -> Result<reqwest::Url, FetchError> {
        reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))
    }

    /// Sends without judging the status.
    async fn exchange(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FetchError> {
        let request = request.header(USER_AGENT, self.settings.user_agent.as_str());
        tokio::time::timeout(self.settings.request_timeout, request.send())
            .await
            .map_err(|_| FetchError::new(FailureKind::Timeout, "no response before timeout"))?
            .map_err(map_reqwest_error)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FetchError> {
        let response = self.exchange(request).await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl MediaFetcher for ReqwestFetcher {
    /// A HEAD the server refuses means "size unknown", not a failed download.
    async fn probe_size(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let parsed = Self::parse(url)?;
        let response = self.exchange(self.client.head(parsed)).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok()))
    }

    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        let parsed = Self::parse(url)?;
        let response = self.send(self.client.get(parsed)).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(map_reqwest_error)),
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
