use crate::core::stage::StageIo;
use crate::domain::model::{Chunk, Headers};
use crate::domain::ports::{Capabilities, ProducerMetadata, Stage, Teardown};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

enum Origin {
    Response(Response),
    Request(RequestBuilder),
}

/// HTTP 回應本文的來源階段
///
/// Built from a response already in hand, its headers are available when the
/// pipeline is wired. Built from a request, the headers are delivered later,
/// once the response arrives.
pub struct HttpSource {
    origin: Origin,
    late_headers: Option<oneshot::Sender<Headers>>,
    aborted: Arc<AtomicBool>,
}

impl HttpSource {
    pub fn from_response(response: Response) -> Self {
        Self::with_origin(Origin::Response(response))
    }

    pub fn request(request: RequestBuilder) -> Self {
        Self::with_origin(Origin::Request(request))
    }

    pub fn get(client: &Client, url: &str) -> Self {
        Self::request(client.get(url))
    }

    fn with_origin(origin: Origin) -> Self {
        Self {
            origin,
            late_headers: None,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Stage for HttpSource {
    fn name(&self) -> &str {
        "http-source"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SOURCE
    }

    fn teardown(&self) -> Teardown {
        let aborted = Arc::clone(&self.aborted);
        Teardown::default().with_abort(move || {
            aborted.store(true, Ordering::Relaxed);
            Ok(())
        })
    }

    fn metadata(&mut self) -> Option<ProducerMetadata> {
        match &self.origin {
            Origin::Response(response) => {
                Some(ProducerMetadata::from_headers(Headers::from(response.headers())))
            }
            Origin::Request(_) => {
                let (tx, rx) = oneshot::channel();
                self.late_headers = Some(tx);
                Some(ProducerMetadata::late(rx))
            }
        }
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        let HttpSource {
            origin,
            late_headers,
            aborted,
        } = *self;

        let response = match origin {
            Origin::Response(response) => response.error_for_status()?,
            Origin::Request(request) => {
                let response = request.send().await?.error_for_status()?;
                tracing::debug!("HTTP {} from {}", response.status(), response.url());
                if let Some(tx) = late_headers {
                    let _ = tx.send(Headers::from(response.headers()));
                }
                response
            }
        };

        let mut response = response;
        while let Some(bytes) = response.chunk().await? {
            if aborted.load(Ordering::Relaxed) {
                tracing::debug!("HTTP transfer aborted");
                break;
            }
            if !io.send(Chunk::Bytes(bytes.to_vec())).await {
                break;
            }
        }
        Ok(())
    }
}
