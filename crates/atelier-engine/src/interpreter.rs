use atelier_contracts::errors::{
    GenerationFailure, ImageAcquisitionError, RemoteCapabilityError, TryOnError,
};
use atelier_contracts::events::{EventLog, TryOnEvent};
use atelier_contracts::generation::{
    decode_candidate_parts, GenerationPayload, PromptVersion, ResponsePart,
};
use atelier_contracts::media::{classify_payload, CanonicalImage, EncodedImage};
use atelier_contracts::outfits::TryOnResult;
use atelier_contracts::text::excerpt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::acquire::{decode_inline, FetchedImage, ImageAcquirer};
use crate::backend::GenerationBackend;
use crate::record_event;

const TEXT_EXCERPT_CHARS: usize = 150;

/// Downloads file references the image model hands back instead of inline data.
pub trait FileFetcher: Send + Sync {
    fn fetch_file(&self, uri: &str) -> Result<FetchedImage, ImageAcquisitionError>;
}

impl FileFetcher for ImageAcquirer {
    fn fetch_file(&self, uri: &str) -> Result<FetchedImage, ImageAcquisitionError> {
        self.download(uri)
    }
}

enum Scan {
    Image(EncodedImage),
    NoImage { first_text: Option<String> },
}

/// Extracts the generated image from `generateContent` responses, retrying
/// once with the image-only directive when a response carries no image.
pub struct ResponseInterpreter<'a> {
    backend: &'a dyn GenerationBackend,
    files: &'a dyn FileFetcher,
    model: &'a str,
    events: Option<&'a EventLog>,
}

impl<'a> ResponseInterpreter<'a> {
    pub fn new(
        backend: &'a dyn GenerationBackend,
        files: &'a dyn FileFetcher,
        model: &'a str,
    ) -> Self {
        Self {
            backend,
            files,
            model,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Sends `payload` and interprets the answer.
    pub fn run(&self, garment: &str, payload: &GenerationPayload) -> TryOnResult {
        self.record(TryOnEvent::AttemptStarted {
            garment: garment.to_string(),
            attempt: 1,
            prompt_version: PromptVersion::Standard,
        });
        let response = self.backend.generate_content(self.model, payload);
        self.interpret(garment, response, payload)
    }

    /// Interprets the first response to `payload`, issuing at most one retry.
    pub fn interpret(
        &self,
        garment: &str,
        response: Result<Value, RemoteCapabilityError>,
        payload: &GenerationPayload,
    ) -> TryOnResult {
        let first_text = match self.scan_response(response) {
            Ok(Scan::Image(image)) => return TryOnResult::Success { image },
            Ok(Scan::NoImage { first_text }) => first_text,
            Err(err) => return TryOnResult::Failure(err.into()),
        };
        self.record(TryOnEvent::AttemptWithoutImage {
            garment: garment.to_string(),
            attempt: 1,
            text_excerpt: first_text
                .as_deref()
                .map(|text| excerpt(text, TEXT_EXCERPT_CHARS)),
        });
        info!(garment, "no image in response; retrying with image-only directive");

        let retry_payload = payload.with_image_only_directive();
        self.record(TryOnEvent::AttemptStarted {
            garment: garment.to_string(),
            attempt: 2,
            prompt_version: PromptVersion::ImageOnly,
        });
        let retry_response = self.backend.generate_content(self.model, &retry_payload);
        let retry_text = match self.scan_response(retry_response) {
            Ok(Scan::Image(image)) => return TryOnResult::Success { image },
            Ok(Scan::NoImage { first_text }) => first_text,
            Err(err) => return TryOnResult::Failure(err.into()),
        };
        self.record(TryOnEvent::AttemptWithoutImage {
            garment: garment.to_string(),
            attempt: 2,
            text_excerpt: retry_text
                .as_deref()
                .map(|text| excerpt(text, TEXT_EXCERPT_CHARS)),
        });

        let failure = match retry_text.or(first_text) {
            Some(text) => GenerationFailure::TextOnly {
                excerpt: excerpt(&text, TEXT_EXCERPT_CHARS),
            },
            None => GenerationFailure::Unparseable,
        };
        warn!(garment, reason = %failure, "image model produced no image after retry");
        TryOnResult::Failure(TryOnError::Generation(failure))
    }

    fn scan_response(
        &self,
        response: Result<Value, RemoteCapabilityError>,
    ) -> Result<Scan, RemoteCapabilityError> {
        let parts = decode_candidate_parts(&response?)?;
        Ok(self.scan_parts(&parts))
    }

    /// Returns the first usable image. Text is remembered but never stops the
    /// scan; image parts that fail validation are skipped.
    fn scan_parts(&self, parts: &[ResponsePart]) -> Scan {
        let mut first_text: Option<String> = None;
        for (index, part) in parts.iter().enumerate() {
            match part {
                ResponsePart::Text(text) => {
                    if first_text.is_none() && !text.trim().is_empty() {
                        warn!(
                            part = index,
                            text = %excerpt(text, TEXT_EXCERPT_CHARS),
                            "image model returned text"
                        );
                        first_text = Some(text.clone());
                    }
                }
                ResponsePart::InlineImage(image) => match validated(decode_inline(image)) {
                    Ok(image) => return Scan::Image(image),
                    Err(err) => {
                        warn!(
                            part = index,
                            media_type = %image.media_type,
                            error = %err,
                            "inline image part is not a usable image; continuing scan"
                        );
                    }
                },
                ResponsePart::FileReference { uri, media_type } => {
                    if !is_fetchable(uri) {
                        debug!(part = index, uri = %uri, "skipping non-network file reference");
                        continue;
                    }
                    match self.fetch_file_image(uri, media_type.as_deref()) {
                        Ok(image) => return Scan::Image(image),
                        Err(err) => {
                            warn!(
                                part = index,
                                uri = %uri,
                                error = %err,
                                "file reference download failed; continuing scan"
                            );
                        }
                    }
                }
                ResponsePart::Unrecognized => {
                    debug!(part = index, "skipping unrecognized response part");
                }
            }
        }
        Scan::NoImage { first_text }
    }

    fn fetch_file_image(
        &self,
        uri: &str,
        declared: Option<&str>,
    ) -> Result<EncodedImage, ImageAcquisitionError> {
        let mut fetched = self.files.fetch_file(uri)?;
        if fetched.advertised.is_none() {
            fetched.advertised = declared.map(str::to_string);
        }
        validated(Ok(fetched))
    }

    fn record(&self, event: TryOnEvent) {
        record_event(self.events, &event);
    }
}

/// Sniffs the bytes and re-wraps them under the detected media type.
fn validated(
    fetched: Result<FetchedImage, ImageAcquisitionError>,
) -> Result<EncodedImage, ImageAcquisitionError> {
    let fetched = fetched?;
    let media_type = classify_payload(
        &fetched.bytes,
        fetched.advertised.as_deref(),
        &fetched.source_label,
    )?;
    Ok(CanonicalImage::from_bytes(media_type, &fetched.bytes).to_encoded())
}

fn is_fetchable(uri: &str) -> bool {
    let lowered = uri.trim().to_ascii_lowercase();
    lowered.starts_with("https://") || lowered.starts_with("http://")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use atelier_contracts::errors::{
        GenerationFailure, ImageAcquisitionError, RemoteCapabilityError, TryOnError,
    };
    use atelier_contracts::generation::{
        build_payload, GenerationPayload, TryOnRequest, IMAGE_ONLY_DIRECTIVE,
    };
    use atelier_contracts::media::{CanonicalImage, ImageReference, MediaType};
    use atelier_contracts::outfits::TryOnResult;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::{json, Value};

    use super::{FileFetcher, ResponseInterpreter};
    use crate::acquire::FetchedImage;
    use crate::backend::GenerationBackend;
    use crate::normalize::tests::{jpeg_bytes, png_bytes};

    /// Replays canned responses and records the payload of each call.
    pub(crate) struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<Value, RemoteCapabilityError>>>,
        pub(crate) prompts: Mutex<Vec<GenerationPayload>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(responses: Vec<Result<Value, RemoteCapabilityError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|payload| payload.text().unwrap_or_default().to_string())
                .collect()
        }
    }

    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate_content(
            &self,
            _model: &str,
            payload: &GenerationPayload,
        ) -> Result<Value, RemoteCapabilityError> {
            self.prompts.lock().unwrap().push(payload.clone());
            self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(RemoteCapabilityError::NetworkFailure(
                    "script exhausted".to_string(),
                ))
            })
        }
    }

    pub(crate) fn text_response(texts: &[&str]) -> Result<Value, RemoteCapabilityError> {
        let parts: Vec<Value> = texts.iter().map(|text| json!({ "text": text })).collect();
        Ok(json!({"candidates": [{"content": {"parts": parts}}]}))
    }

    pub(crate) fn image_response(mime: &str, data: &str) -> Result<Value, RemoteCapabilityError> {
        Ok(json!({"candidates": [{"content": {"parts": [
            {"text": "Here is the try-on."},
            {"inlineData": {"mimeType": mime, "data": data}}
        ]}}]}))
    }

    fn parts_response(parts: Value) -> Result<Value, RemoteCapabilityError> {
        Ok(json!({"candidates": [{"content": {"parts": parts}}]}))
    }

    fn png_data() -> String {
        BASE64.encode(png_bytes(6, 4, [40, 80, 120]))
    }

    struct MapFetcher {
        body: Option<Vec<u8>>,
    }

    impl FileFetcher for MapFetcher {
        fn fetch_file(&self, uri: &str) -> Result<FetchedImage, ImageAcquisitionError> {
            match &self.body {
                Some(bytes) => Ok(FetchedImage {
                    bytes: bytes.clone(),
                    advertised: None,
                    source_label: uri.to_string(),
                }),
                None => Err(ImageAcquisitionError::FetchFailed {
                    source_label: uri.to_string(),
                    detail: "HTTP 403 Forbidden".to_string(),
                }),
            }
        }
    }

    const NO_FILES: MapFetcher = MapFetcher { body: None };

    fn payload() -> GenerationPayload {
        let request = TryOnRequest::new(
            ImageReference::parse("/me.jpg").unwrap(),
            ImageReference::parse("/scarf.png").unwrap(),
            "Silk Scarf",
        );
        build_payload(
            &request,
            CanonicalImage::from_bytes(MediaType::Png, b"garment"),
            CanonicalImage::from_bytes(MediaType::Jpeg, b"person"),
        )
    }

    fn interpret_first(
        backend: &ScriptedBackend,
        files: &MapFetcher,
        first: Result<Value, RemoteCapabilityError>,
    ) -> TryOnResult {
        ResponseInterpreter::new(backend, files, "test-model").interpret(
            "Silk Scarf",
            first,
            &payload(),
        )
    }

    #[test]
    fn inline_image_after_caption_succeeds_without_retry() {
        let backend = ScriptedBackend::new(vec![]);
        let result = interpret_first(&backend, &NO_FILES, image_response("image/png", &png_data()));

        let image = result.image().cloned().unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.data, png_data());
        assert!(image.to_data_url().starts_with("data:image/png;base64,iVBOR"));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn inline_image_is_relabelled_with_sniffed_type() {
        let backend = ScriptedBackend::new(vec![]);
        let jpeg = BASE64.encode(jpeg_bytes(4, 4, [9, 9, 9]));
        let result = interpret_first(&backend, &NO_FILES, image_response("image/png", &jpeg));
        assert_eq!(
            result.image().map(|image| image.media_type.as_str()),
            Some("image/jpeg")
        );
    }

    #[test]
    fn invalid_inline_parts_are_skipped_not_accepted() {
        let backend = ScriptedBackend::new(vec![]);
        let result = interpret_first(
            &backend,
            &NO_FILES,
            parts_response(json!([
                {"inlineData": {"mimeType": "text/plain", "data": "not base64 at all!!"}},
                {"inlineData": {"mimeType": "image/png", "data": "QUJD"}},
                {"inlineData": {"mimeType": "image/png", "data": png_data()}}
            ])),
        );
        assert_eq!(
            result.image().map(|image| image.data.clone()),
            Some(png_data())
        );
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn only_invalid_inline_parts_end_unparseable_after_retry() {
        let bogus = json!([{"inlineData": {"mimeType": "text/plain", "data": "bm90IGFuIGltYWdl"}}]);
        let backend = ScriptedBackend::new(vec![parts_response(bogus.clone())]);
        let result = interpret_first(&backend, &NO_FILES, parts_response(bogus));

        assert_eq!(backend.calls(), 1);
        assert!(matches!(
            result,
            TryOnResult::Failure(TryOnError::Generation(GenerationFailure::Unparseable))
        ));
    }

    #[test]
    fn text_only_response_is_retried_once_with_directive() {
        let jpeg = BASE64.encode(jpeg_bytes(4, 4, [200, 10, 10]));
        let backend = ScriptedBackend::new(vec![image_response("image/jpeg", &jpeg)]);
        let result = interpret_first(&backend, &NO_FILES, text_response(&["I can't do that."]));

        assert!(result.is_success());
        assert_eq!(backend.calls(), 1);
        let texts = backend.texts();
        assert!(texts[0].ends_with(IMAGE_ONLY_DIRECTIVE));
        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts[0].parts()[..2], payload().parts()[..2]);
    }

    #[test]
    fn retry_happens_at_most_once_regardless_of_text_parts() {
        let backend = ScriptedBackend::new(vec![
            text_response(&["still text", "more text", "even more"]),
            image_response("image/png", &png_data()),
        ]);
        let result = interpret_first(
            &backend,
            &NO_FILES,
            text_response(&["first", "second", "third", "fourth"]),
        );

        assert_eq!(backend.calls(), 1);
        match result {
            TryOnResult::Failure(TryOnError::Generation(GenerationFailure::TextOnly {
                excerpt,
            })) => {
                assert_eq!(excerpt, "still text");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn no_text_and_no_image_is_unparseable() {
        let backend = ScriptedBackend::new(vec![parts_response(json!([{"functionCall": {}}]))]);
        let result = interpret_first(
            &backend,
            &NO_FILES,
            parts_response(json!([{"inlineData": {"data": ""}}])),
        );
        assert!(matches!(
            result,
            TryOnResult::Failure(TryOnError::Generation(GenerationFailure::Unparseable))
        ));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn first_attempt_text_is_reported_when_retry_has_none() {
        let backend = ScriptedBackend::new(vec![parts_response(json!([{"thought": true}]))]);
        let result = interpret_first(
            &backend,
            &NO_FILES,
            text_response(&["   ", "Policy refusal\n text"]),
        );
        match result {
            TryOnResult::Failure(TryOnError::Generation(GenerationFailure::TextOnly {
                excerpt,
            })) => {
                assert_eq!(excerpt, "Policy refusal text");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn shape_errors_fail_fast_without_retry() {
        let backend = ScriptedBackend::new(vec![]);
        let result = interpret_first(&backend, &NO_FILES, Ok(json!({"candidates": []})));
        assert!(matches!(
            result,
            TryOnResult::Failure(TryOnError::Remote(RemoteCapabilityError::NoCandidates { .. }))
        ));

        let result = interpret_first(
            &backend,
            &NO_FILES,
            Err(RemoteCapabilityError::NetworkFailure("timed out".to_string())),
        );
        assert!(matches!(
            result,
            TryOnResult::Failure(TryOnError::Remote(RemoteCapabilityError::NetworkFailure(_)))
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn retry_shape_error_is_reported() {
        let backend = ScriptedBackend::new(vec![parts_response(json!([]))]);
        let result = interpret_first(&backend, &NO_FILES, text_response(&["caption"]));
        assert!(matches!(
            result,
            TryOnResult::Failure(TryOnError::Remote(RemoteCapabilityError::EmptyParts))
        ));
    }

    #[test]
    fn file_reference_is_downloaded_and_rewrapped() -> anyhow::Result<()> {
        let backend = ScriptedBackend::new(vec![]);
        let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let files = MapFetcher {
            body: Some(png.clone()),
        };
        let result = interpret_first(
            &backend,
            &files,
            parts_response(json!([
                {"fileData": {"fileUri": "https://files.example/out", "mimeType": "image/jpeg"}}
            ])),
        );
        let image = result.into_result()?;
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.decode_bytes()?, png);
        assert_eq!(backend.calls(), 0);
        Ok(())
    }

    #[test]
    fn failed_file_download_continues_to_later_parts() {
        let backend = ScriptedBackend::new(vec![]);
        let result = interpret_first(
            &backend,
            &NO_FILES,
            parts_response(json!([
                {"fileData": {"fileUri": "https://files.example/expired"}},
                {"fileData": {"fileUri": "gs://bucket/not-fetchable"}},
                {"inlineData": {"mimeType": "image/png", "data": png_data()}}
            ])),
        );
        assert_eq!(
            result.image().map(|image| image.media_type.as_str()),
            Some("image/png")
        );
        assert_eq!(backend.calls(), 0);
    }
}
