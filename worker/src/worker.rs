//! Request handling
//!
//! [`Worker`] owns the state that outlives a single request: the fetch
//! configuration store and the mask decoder. Every process request builds its
//! own render context and accumulators.

use metrics::{counter, histogram};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::labels::{LabelError, LabelInput};
use crate::overlay::{
    ColorContext, DecodeError, FetchConfig, FetchConfigStore, MaskDecoder, OverlayDecoder,
    resolve_color,
};
use crate::pipeline::{DenseLabelPipeline, RenderContext};
use crate::protocol::{
    InitRequest, KNOWN_METHODS, ProcessRequest, Reply, Request, ResolveColorRequest, Response,
    Transferable,
};

/// Errors that fail a whole request
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error(transparent)]
    Labels(#[from] LabelError),
}

pub struct Worker {
    fetch: FetchConfigStore,
    pipeline: DenseLabelPipeline,
}

impl Worker {
    pub fn new(config: &Config) -> Result<Self, DecodeError> {
        let decoder = MaskDecoder::new(&config.decode)?;
        Ok(Self::with_decoder(
            config.fetch.to_fetch_config(),
            Arc::new(decoder),
        ))
    }

    pub fn with_decoder(fetch: FetchConfig, decoder: Arc<dyn OverlayDecoder>) -> Self {
        Self {
            fetch: FetchConfigStore::new(fetch),
            pipeline: DenseLabelPipeline::new(decoder),
        }
    }

    pub fn fetch_store(&self) -> &FetchConfigStore {
        &self.fetch
    }

    /// Handle one inbound JSON message.
    ///
    /// Returns `None` for messages that get no reply: `init` and unknown
    /// methods.
    pub async fn handle_message(&self, text: &str) -> Option<Reply> {
        match Self::parse_message(text) {
            Ok(Some(request)) => self.handle_request(request).await,
            Ok(None) => None,
            Err(reply) => Some(reply),
        }
    }

    /// Parse one inbound JSON message into a request.
    ///
    /// Unknown methods yield `Ok(None)`; malformed messages yield the error
    /// reply to send back.
    pub fn parse_message(text: &str) -> Result<Option<Request>, Reply> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            warn!("Failed to parse message: {}", e);
            Reply::error(None, format!("Invalid message: {}", e))
        })?;

        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if !KNOWN_METHODS.contains(&method.as_str()) {
            warn!("Ignoring message with unknown method {:?}", method);
            return Ok(None);
        }
        counter!("dense_label_requests_total", "method" => method.clone()).increment(1);

        let uuid = value
            .get("uuid")
            .and_then(Value::as_str)
            .map(str::to_owned);
        serde_json::from_value::<Request>(value)
            .map(Some)
            .map_err(|e| {
                warn!("Malformed {} request: {}", method, e);
                Reply::error(uuid, WorkerError::from(e).to_string())
            })
    }

    pub async fn handle_request(&self, request: Request) -> Option<Reply> {
        match request {
            Request::Init(init) => {
                self.init(init).await;
                None
            }
            Request::ProcessDenseLabels(request) => {
                let uuid = request.uuid.clone();
                Some(match self.process(*request).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("Request {} failed: {}", uuid, e);
                        Reply::error(Some(uuid), e.to_string())
                    }
                })
            }
            Request::ResolveColor(request) => Some(Self::resolve_color(request)),
        }
    }

    async fn init(&self, init: InitRequest) {
        let config = FetchConfig {
            origin: init.origin.filter(|origin| !origin.is_empty()),
            headers: init.headers,
            path_prefix: init.path_prefix.unwrap_or_default(),
        };
        let generation = self.fetch.replace(config).await;
        debug!("Worker initialized (fetch generation {})", generation);
    }

    async fn process(&self, request: ProcessRequest) -> Result<Reply, WorkerError> {
        let start = Instant::now();
        let ProcessRequest {
            uuid,
            labels,
            coloring,
            customize_color_setting,
            label_tag_colors,
            colorscale,
            selected_label_tags,
            sources,
            schema,
            prefix,
        } = request;

        let prefix = prefix.unwrap_or_default();
        let mut input = LabelInput::resolve(labels, &schema, &prefix)?;

        let context = RenderContext {
            fetch: self.fetch.snapshot().await,
            colors: ColorContext {
                coloring: coloring.unwrap_or_default(),
                customize: customize_color_setting.unwrap_or_default(),
                tag_colors: label_tag_colors.unwrap_or_default(),
                colorscale: colorscale.unwrap_or_default(),
                selected_tags: selected_label_tags.unwrap_or_default(),
            },
            sources,
        };

        let outcome = self.pipeline.process(&mut input, &context).await;
        let labels = input.into_value()?;

        let elapsed = start.elapsed();
        histogram!("dense_label_request_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            "Processed request {}: {} bitmaps, {} buffers, {} failures in {:?}",
            uuid,
            outcome.bitmaps.len(),
            outcome.buffers.len(),
            outcome.diagnostics.len(),
            elapsed
        );

        let transferables = outcome
            .bitmaps
            .into_iter()
            .map(Transferable::Bitmap)
            .chain(outcome.buffers.into_iter().map(Transferable::Buffer))
            .collect();

        Ok(Reply {
            response: Response::DenseLabelsProcessed {
                uuid,
                labels,
                diagnostics: outcome.diagnostics,
            },
            transferables,
        })
    }

    fn resolve_color(request: ResolveColorRequest) -> Reply {
        let key = match &request.key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let color = resolve_color(&request.pool, request.seed, &key);
        Reply::new(Response::ColorResolved {
            key: request.key,
            seed: request.seed,
            color,
        })
    }
}
