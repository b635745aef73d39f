use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use atelier_contracts::errors::ImageAcquisitionError;
use atelier_contracts::media::{
    classify_payload, CanonicalImage, EncodedImage, ImageReference, MediaType,
};
use atelier_contracts::text::truncate_text;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tracing::debug;

use crate::config::TryOnConfig;
use crate::normalize::Normalizer;
use crate::transport_error_text;

/// Raw bytes as obtained from a source, before validation.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// Declared type (data URL header or `Content-Type`); never trusted.
    pub advertised: Option<String>,
    pub source_label: String,
}

/// Query parameters forced onto URLs of known image CDNs.
struct HostRule {
    host: &'static str,
    defaults: &'static [(&'static str, &'static str)],
    width: (&'static str, &'static str),
    /// Width is only forced when none of these is already set.
    sizing_keys: &'static [&'static str],
}

const HOST_RULES: &[HostRule] = &[
    HostRule {
        host: "images.unsplash.com",
        defaults: &[("fm", "jpg"), ("q", "80")],
        width: ("w", "800"),
        sizing_keys: &["w", "h"],
    },
    HostRule {
        host: "images.pexels.com",
        defaults: &[("auto", "compress"), ("cs", "tinysrgb")],
        width: ("w", "800"),
        sizing_keys: &["w", "h"],
    },
];

/// Appends the host rule's parameters to known image-CDN URLs. Parameters
/// already present are left alone; other hosts are returned untouched.
pub fn normalized_fetch_url(mut url: Url) -> Url {
    let Some(rule) = url
        .host_str()
        .and_then(|host| HOST_RULES.iter().find(|rule| rule.host.eq_ignore_ascii_case(host)))
    else {
        return url;
    };
    let existing: Vec<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
    let has = |key: &str| existing.iter().any(|existing_key| existing_key == key);

    let mut additions: Vec<(&str, &str)> = rule
        .defaults
        .iter()
        .filter(|(key, _)| !has(key))
        .copied()
        .collect();
    if !rule.sizing_keys.iter().any(|key| has(key)) {
        additions.push(rule.width);
    }
    if !additions.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in additions {
            pairs.append_pair(key, value);
        }
    }
    url
}

/// Turns image references into canonical images.
pub struct ImageAcquirer {
    http: HttpClient,
    asset_root: PathBuf,
    fetch_timeout: Duration,
    normalizer: Normalizer,
}

impl ImageAcquirer {
    pub fn new(config: &TryOnConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build image HTTP client")?;
        Ok(Self {
            http,
            asset_root: config.asset_root.clone(),
            fetch_timeout: config.fetch_timeout,
            normalizer: Normalizer::new(config.max_dimension, config.jpeg_quality),
        })
    }

    pub fn acquire(
        &self,
        reference: &ImageReference,
    ) -> Result<CanonicalImage, ImageAcquisitionError> {
        let fetched = self.fetch(reference)?;
        let media_type = classify_payload(
            &fetched.bytes,
            fetched.advertised.as_deref(),
            &fetched.source_label,
        )?;
        if let Some(advertised) = fetched.advertised.as_deref() {
            if MediaType::from_mime(advertised) != Some(media_type) {
                debug!(
                    source = %fetched.source_label,
                    advertised,
                    sniffed = %media_type,
                    "declared media type disagrees with content; using sniffed type"
                );
            }
        }
        Ok(self.normalizer.normalize(&fetched.bytes, media_type))
    }

    /// Obtains raw bytes without validating or normalizing them.
    pub fn fetch(&self, reference: &ImageReference) -> Result<FetchedImage, ImageAcquisitionError> {
        match reference {
            ImageReference::Inline(image) => decode_inline(image),
            ImageReference::LocalPath(path) => self.read_asset(path),
            ImageReference::RemoteUrl(url) => self.download(url),
        }
    }

    /// Maps `/a/b.png` to `<asset root>/a/b.png`, refusing anything that
    /// could land outside the root.
    pub fn resolve_asset_path(&self, path: &Path) -> Result<PathBuf, ImageAcquisitionError> {
        let escapes = || {
            ImageAcquisitionError::InvalidReference(format!(
                "asset path escapes the asset root: {}",
                path.display()
            ))
        };
        let mut resolved = self.asset_root.clone();
        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir | Component::Prefix(_) => return Err(escapes()),
            }
        }
        if depth == 0 {
            return Err(ImageAcquisitionError::InvalidReference(format!(
                "asset path names no file: {}",
                path.display()
            )));
        }
        // Symlinks inside the root may still point elsewhere.
        if let (Ok(root), Ok(target)) = (self.asset_root.canonicalize(), resolved.canonicalize()) {
            if !target.starts_with(&root) {
                return Err(escapes());
            }
        }
        Ok(resolved)
    }

    fn read_asset(&self, path: &Path) -> Result<FetchedImage, ImageAcquisitionError> {
        let resolved = self.resolve_asset_path(path)?;
        let bytes = fs::read(&resolved).map_err(|error| ImageAcquisitionError::Filesystem {
            path: resolved.clone(),
            error,
        })?;
        Ok(FetchedImage {
            bytes,
            advertised: None,
            source_label: path.display().to_string(),
        })
    }

    /// GET with `Accept: image/*`. Non-2xx, timeouts and empty bodies all fail.
    pub fn download(&self, raw_url: &str) -> Result<FetchedImage, ImageAcquisitionError> {
        let source_label = truncate_text(raw_url, 96);
        let url = Url::parse(raw_url).map_err(|err| {
            ImageAcquisitionError::InvalidReference(format!("invalid URL {source_label}: {err}"))
        })?;
        let url = normalized_fetch_url(url);
        debug!(url = %url, "fetching remote image");

        let fetch_failed = |detail: String| ImageAcquisitionError::FetchFailed {
            source_label: source_label.clone(),
            detail,
        };
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "image/*")
            .timeout(self.fetch_timeout)
            .send()
            .map_err(|err| fetch_failed(transport_error_text(&err, self.fetch_timeout)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failed(format!("HTTP {status}")));
        }
        let advertised = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|err| fetch_failed(transport_error_text(&err, self.fetch_timeout)))?
            .to_vec();
        if bytes.is_empty() {
            return Err(ImageAcquisitionError::EmptyPayload(source_label));
        }
        Ok(FetchedImage {
            bytes,
            advertised,
            source_label,
        })
    }
}

pub(crate) fn decode_inline(image: &EncodedImage) -> Result<FetchedImage, ImageAcquisitionError> {
    if !image.media_type.to_ascii_lowercase().starts_with("image/") {
        return Err(ImageAcquisitionError::InvalidReference(format!(
            "data URL media type {} is not an image type",
            image.media_type
        )));
    }
    let bytes = BASE64.decode(image.data.trim().as_bytes()).map_err(|err| {
        ImageAcquisitionError::InvalidReference(format!(
            "data URL payload is not valid base64: {err}"
        ))
    })?;
    let source_label = "inline image data".to_string();
    if bytes.is_empty() {
        return Err(ImageAcquisitionError::EmptyPayload(source_label));
    }
    Ok(FetchedImage {
        bytes,
        advertised: Some(image.media_type.clone()),
        source_label,
    })
}
