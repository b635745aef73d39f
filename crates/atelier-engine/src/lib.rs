pub mod acquire;
pub mod backend;
pub mod config;
pub mod interpreter;
pub mod normalize;

use std::error::Error as StdError;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use atelier_contracts::errors::{
    GenerationFailure, ImageAcquisitionError, ImageRole, LayeringFailure, TryOnError,
};
use atelier_contracts::events::{EventLog, TryOnEvent};
use atelier_contracts::garments::GarmentItem;
use atelier_contracts::generation::{build_payload, TryOnRequest};
use atelier_contracts::media::{CanonicalImage, ImageReference};
use atelier_contracts::outfits::{fold_layers, OutfitResult, TryOnResult};
use atelier_contracts::text::truncate_text;
use tracing::{info, warn};

use crate::acquire::ImageAcquirer;
use crate::backend::{GeminiBackend, GenerationBackend};
use crate::config::TryOnConfig;
use crate::interpreter::ResponseInterpreter;

/// Composites garments onto a person photo, one garment per model call.
pub struct TryOnEngine {
    config: TryOnConfig,
    acquirer: ImageAcquirer,
    backend: Box<dyn GenerationBackend>,
    events: Option<EventLog>,
}

impl TryOnEngine {
    /// Engine backed by the Gemini API; fails without an API key.
    pub fn new(config: TryOnConfig) -> Result<Self> {
        let backend = GeminiBackend::new(&config)?;
        Self::with_backend(config, Box::new(backend))
    }

    pub fn with_backend(config: TryOnConfig, backend: Box<dyn GenerationBackend>) -> Result<Self> {
        let acquirer = ImageAcquirer::new(&config)?;
        Ok(Self {
            config,
            acquirer,
            backend,
            events: None,
        })
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Resolves, validates and normalizes one reference.
    pub fn acquire(
        &self,
        reference: &ImageReference,
    ) -> Result<CanonicalImage, ImageAcquisitionError> {
        self.acquirer.acquire(reference)
    }

    /// Applies one garment to one photo. Never panics or returns early; every
    /// failure is folded into the result.
    pub fn generate_single_try_on(&self, request: &TryOnRequest) -> TryOnResult {
        let garment = request.garment_name.as_str();
        info!(
            garment,
            backend = self.backend.name(),
            model = %self.config.model,
            base = %request.base_photo.label(),
            "starting try-on"
        );
        let result = self.run_try_on(request);
        match &result {
            TryOnResult::Success { image } => {
                info!(garment, digest = %image.digest(), "try-on succeeded");
            }
            TryOnResult::Failure(err) => {
                warn!(
                    garment,
                    dead_link = err.is_dead_image_link(),
                    error = %err,
                    "try-on failed"
                );
            }
        }
        self.record(TryOnEvent::TryOnFinished {
            garment: garment.to_string(),
            success: result.is_success(),
            image_digest: result.image().map(|image| image.digest()),
            reason: result.reason(),
        });
        result
    }

    /// Independent try-ons run concurrently. Results keep the input order.
    pub fn generate_try_on_batch(&self, requests: &[TryOnRequest]) -> Vec<TryOnResult> {
        thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || self.generate_single_try_on(request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        let failure = GenerationFailure::Unparseable;
                        TryOnResult::Failure(TryOnError::Generation(failure))
                    })
                })
                .collect()
        })
    }

    /// Layers `items` in order, each step's output becoming the next base.
    ///
    /// A failure after at least one applied garment ends the run early with
    /// the last good image; a failure on the first garment fails the run.
    pub fn generate_layered_outfit(
        &self,
        base_photo: ImageReference,
        items: &[GarmentItem],
    ) -> OutfitResult {
        info!(items = items.len(), base = %base_photo.label(), "layering outfit");
        let outcome = fold_layers(base_photo, items, |index, item, base| {
            let result = match item.image_reference() {
                Ok(garment_image) => {
                    let request = TryOnRequest::for_item(base.clone(), garment_image, item);
                    self.generate_single_try_on(&request)
                }
                Err(err) => {
                    TryOnResult::Failure(TryOnError::acquisition(ImageRole::Garment, err))
                }
            };
            if let TryOnResult::Success { image } = &result {
                info!(
                    index,
                    garment = %item.name,
                    seller = item.seller().unwrap_or("unknown"),
                    "layer applied"
                );
                self.record(TryOnEvent::LayerApplied {
                    index,
                    garment: item.name.clone(),
                    image_digest: image.digest(),
                });
            }
            result
        });
        self.record_layering_outcome(items, &outcome);
        outcome
    }

    /// Logs the layer failure the fold stopped at, with the tolerance the
    /// fold decided on, then the run summary.
    fn record_layering_outcome(&self, items: &[GarmentItem], outcome: &OutfitResult) {
        let seller_of = |index: usize| {
            items
                .get(index)
                .and_then(GarmentItem::seller)
                .unwrap_or("unknown")
                .to_string()
        };
        match outcome {
            OutfitResult::Success {
                dropped: Some(layer),
                ..
            } => {
                warn!(
                    index = layer.index,
                    garment = %layer.item_name,
                    seller = %seller_of(layer.index),
                    error = %layer.reason,
                    "layer failed; keeping previous layers"
                );
                self.record(TryOnEvent::LayerFailed {
                    index: layer.index,
                    garment: layer.item_name.clone(),
                    reason: layer.reason.clone(),
                    tolerated: true,
                });
            }
            OutfitResult::Failure(LayeringFailure::FirstItemFailed { item_name, cause }) => {
                warn!(
                    garment = %item_name,
                    seller = %seller_of(0),
                    error = %cause,
                    "first layer failed; outfit abandoned"
                );
                self.record(TryOnEvent::LayerFailed {
                    index: 0,
                    garment: item_name.clone(),
                    reason: cause.to_string(),
                    tolerated: false,
                });
            }
            OutfitResult::Success { dropped: None, .. } => {}
        }

        let layers_applied = match outcome {
            OutfitResult::Success { applied, .. } => applied.len(),
            OutfitResult::Failure(_) => 0,
        };
        info!(success = outcome.is_success(), layers_applied, "outfit finished");
        self.record(TryOnEvent::OutfitFinished {
            success: outcome.is_success(),
            layers_applied,
            reason: outcome.reason(),
        });
    }

    fn run_try_on(&self, request: &TryOnRequest) -> TryOnResult {
        let (garment, base) = match self.acquire_pair(request) {
            Ok(pair) => pair,
            Err(err) => return TryOnResult::Failure(err),
        };
        let payload = build_payload(request, garment, base);
        ResponseInterpreter::new(self.backend.as_ref(), &self.acquirer, &self.config.model)
            .with_events(self.events.as_ref())
            .run(&request.garment_name, &payload)
    }

    /// Acquires garment and base photo concurrently. When both fail the
    /// garment error is reported.
    fn acquire_pair(
        &self,
        request: &TryOnRequest,
    ) -> Result<(CanonicalImage, CanonicalImage), TryOnError> {
        let (garment, base) = thread::scope(|scope| {
            let garment = scope.spawn(|| self.acquirer.acquire(&request.garment_image));
            let base = scope.spawn(|| self.acquirer.acquire(&request.base_photo));
            (
                joined(garment.join(), &request.garment_image),
                joined(base.join(), &request.base_photo),
            )
        });
        let garment = garment.map_err(|err| TryOnError::acquisition(ImageRole::Garment, err))?;
        let base = base.map_err(|err| TryOnError::acquisition(ImageRole::BasePhoto, err))?;
        Ok((garment, base))
    }

    fn record(&self, event: TryOnEvent) {
        record_event(self.events.as_ref(), &event);
    }
}

fn joined(
    outcome: thread::Result<Result<CanonicalImage, ImageAcquisitionError>>,
    reference: &ImageReference,
) -> Result<CanonicalImage, ImageAcquisitionError> {
    outcome.unwrap_or_else(|_| {
        Err(ImageAcquisitionError::FetchFailed {
            source_label: reference.label(),
            detail: "acquisition worker panicked".to_string(),
        })
    })
}

/// Event recording is best effort; a broken log never fails a try-on.
pub(crate) fn record_event(events: Option<&EventLog>, event: &TryOnEvent) {
    let Some(events) = events else {
        return;
    };
    if let Err(err) = events.record(event) {
        warn!(path = %events.path().display(), error = %err, "failed to write try-on event");
    }
}

pub(crate) fn transport_error_text(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        return format!("timed out after {}s", timeout.as_secs_f64());
    }
    let mut parts: Vec<String> = Vec::new();
    let mut cause: Option<&dyn StdError> = Some(err);
    while let Some(current) = cause {
        let text = current.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        cause = current.source();
    }
    truncate_text(&parts.join(" | caused by: "), 320)
}
