use super::{chunked, LayerSource};
use crate::engine::{IoUnit, UnitState, UnitStatus};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use reqwest::{Body, Client, Url};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared HTTP client plus the server layers are uploaded to.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub client: Client,
    pub base_url: Url,
    pub chunk_size: usize,
}

impl UploadTarget {
    /// `<base>/layers/<name>`, with the name percent-encoded as one path segment.
    pub fn layer_url(&self, name: &str) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push("layers")
            .push(name);
        Some(url)
    }
}

/// PUTs a layer to the server as a chunked stream that stops once cancelled.
pub struct HttpUploadUnit {
    label: String,
    client: Client,
    url: Url,
    source: LayerSource,
    chunk_size: usize,
    state: UnitState,
    cancelled: Notify,
}

impl HttpUploadUnit {
    pub fn new(name: &str, target: &UploadTarget, url: Url, source: LayerSource) -> Self {
        Self {
            label: format!("upload '{name}'"),
            client: target.client.clone(),
            url,
            source,
            chunk_size: target.chunk_size,
            state: UnitState::default(),
            cancelled: Notify::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn upload(self: &Arc<Self>) -> Result<()> {
        let body = self.source.load().await?;
        let total = body.len();
        if self.state.is_canceled() {
            return Ok(());
        }

        let unit = self.clone();
        let chunks = stream::iter(chunked(&body, self.chunk_size)).map(move |chunk| {
            if unit.state.is_canceled() {
                Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "upload cancelled",
                ))
            } else {
                Ok(chunk)
            }
        });

        let request = self
            .client
            .put(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(Body::wrap_stream(chunks))
            .send();

        let response = tokio::select! {
            res = request => res,
            _ = self.cancelled.notified() => return Ok(()),
        };
        let response = match response {
            Ok(r) => r,
            Err(_) if self.state.is_canceled() => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("upload to {} failed", self.url)),
        };

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("server rejected upload to {}: HTTP {}", self.url, status);
        }
        tracing::debug!(url = %self.url, bytes = total, %status, "layer uploaded");
        Ok(())
    }
}

impl IoUnit for HttpUploadUnit {
    fn label(&self) -> &str {
        &self.label
    }

    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let result = self.upload().await;
            self.state.finish(result);
            Ok(())
        })
    }

    fn cancel(&self) {
        self.state.cancel();
        // A stored permit wakes the upload even if it is not waiting yet.
        self.cancelled.notify_one();
    }

    fn status(&self) -> UnitStatus {
        self.state.status()
    }
}
