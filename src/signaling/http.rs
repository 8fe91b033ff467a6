use super::SignalingChannel;
use crate::error::ChannelError;
use crate::peer::SignalingEnvelope;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `GET <base>/offer` and answers with `POST <base>/stream`.
pub struct HttpChannel {
    http: reqwest::Client,
    base: String,
}

impl HttpChannel {
    pub fn new(base: &str) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }
}

#[async_trait]
impl SignalingChannel for HttpChannel {
    async fn fetch_offer(&self) -> Result<Option<SignalingEnvelope>, ChannelError> {
        let resp = self.http.get(self.url("offer")).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            debug!("no offer pending ({})", status);
            return Ok(None);
        }

        let text = resp.text().await?;
        let offer: SignalingEnvelope =
            serde_json::from_str(&text).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        info!("offer received over http ({} bytes of sdp)", offer.sdp.len());
        Ok(Some(offer))
    }

    async fn publish_answer(
        &self,
        _correlation_id: &str,
        answer: &SignalingEnvelope,
    ) -> Result<(), ChannelError> {
        let resp = self.http.post(self.url("stream")).json(answer).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ChannelError::Status(status.as_u16()));
        }
        info!("answer posted to {}", self.url("stream"));
        Ok(())
    }
}
