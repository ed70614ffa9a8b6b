//! HTTP client for the gateway's REST adapter, used by the client subcommands.

use anyhow::{Context, bail};
use rest::{
    BrowseNextRequest, Encoding, ErrorBody, InquireRequest, InquireResponse, PutRequest,
    PutResponse, ReadRequest, ReadResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Thin typed wrapper over the REST routes.
pub struct GatewayClient {
    base: String,
    http: reqwest::Client,
}

/// Read parameters shared by get and browse.
#[derive(Debug, Clone, Copy)]
pub struct ReadParams {
    pub wait_ms: i64,
    pub max_msg_bytes: i64,
    pub encoding: Encoding,
}

impl GatewayClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn put(&self, queue: &str, message: &str, encoding: Encoding) -> anyhow::Result<()> {
        let _: PutResponse = self
            .post(
                "/put",
                &PutRequest {
                    queue: queue.to_string(),
                    message: message.to_string(),
                    encoding,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, queue: &str, params: ReadParams) -> anyhow::Result<ReadResponse> {
        self.post("/get", &read_request(queue, params)).await
    }

    pub async fn browse_first(
        &self,
        queue: &str,
        params: ReadParams,
    ) -> anyhow::Result<ReadResponse> {
        self.post("/browse/first", &read_request(queue, params))
            .await
    }

    pub async fn browse_next(
        &self,
        browse_id: &str,
        params: ReadParams,
    ) -> anyhow::Result<ReadResponse> {
        self.post(
            "/browse/next",
            &BrowseNextRequest {
                browse_id: browse_id.to_string(),
                wait_ms: params.wait_ms,
                max_msg_bytes: params.max_msg_bytes,
                encoding: params.encoding,
            },
        )
        .await
    }

    pub async fn inquire(&self, queue: &str) -> anyhow::Result<InquireResponse> {
        self.post(
            "/inquire/queue",
            &InquireRequest {
                queue: queue.to_string(),
            },
        )
        .await
    }

    /// Browses up to `limit` messages: one first, then next until empty.
    pub async fn browse(
        &self,
        queue: &str,
        limit: usize,
        params: ReadParams,
    ) -> anyhow::Result<Vec<String>> {
        let mut messages = Vec::new();
        if limit == 0 {
            return Ok(messages);
        }
        let first = self.browse_first(queue, params).await?;
        let (Some(message), Some(browse_id)) = (first.message, first.browse_id) else {
            return Ok(messages);
        };
        messages.push(message);

        while messages.len() < limit {
            let next = self.browse_next(&browse_id, params).await?;
            match next.message {
                Some(message) if !next.empty => messages.push(message),
                _ => break,
            }
        }
        Ok(messages)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> anyhow::Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let bytes = response.bytes().await.context("reading response body")?;
        if !status.is_success() {
            let reason = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            bail!("{path} failed with HTTP {status}: {reason}");
        }
        serde_json::from_slice(&bytes).with_context(|| format!("decoding {path} response"))
    }
}

fn read_request(queue: &str, params: ReadParams) -> ReadRequest {
    ReadRequest {
        queue: queue.to_string(),
        wait_ms: params.wait_ms,
        max_msg_bytes: params.max_msg_bytes,
        encoding: params.encoding,
    }
}
