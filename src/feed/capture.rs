//! Local capture mode: grab frames from a camera on this side and submit
//! them for recognition.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

use super::{ConnectionState, FeedEvent, FeedHandle, Frame};
use crate::detection::RawDetection;
use crate::error::{FeedError, FeedResult};

const JPEG_QUALITY: u8 = 80;

/// A camera that can be opened for capture
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Open a live stream
    ///
    /// Fails with `MediaAccessDenied` when access is refused or no device
    /// answers.
    async fn open(&self) -> FeedResult<Box<dyn CameraStream>>;
}

/// An open camera stream; dropping it releases the device
#[async_trait]
pub trait CameraStream: Send {
    /// Grab the current frame as encoded image bytes
    async fn capture(&mut self) -> FeedResult<Vec<u8>>;
}

/// Camera that serves still snapshots over HTTP
///
/// Fits an ESP32-CAM `/capture` endpoint or any JPEG snapshot URL.
#[derive(Debug, Clone)]
pub struct SnapshotCamera {
    url: String,
    client: reqwest::Client,
}

impl SnapshotCamera {
    pub fn new(url: &str) -> Self {
        SnapshotCamera {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self) -> FeedResult<Vec<u8>> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::NetworkUnavailable(format!("camera returned {}", status)));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl CameraSource for SnapshotCamera {
    async fn open(&self) -> FeedResult<Box<dyn CameraStream>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::MediaAccessDenied(format!("no camera at {}: {}", self.url, e)))?;

        match response.status() {
            status if status.is_success() => Ok(Box::new(SnapshotStream {
                camera: self.clone(),
            })),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FeedError::MediaAccessDenied(
                format!("camera at {} refused access", self.url),
            )),
            status => Err(FeedError::MediaAccessDenied(format!(
                "camera at {} unavailable ({})",
                self.url, status
            ))),
        }
    }
}

struct SnapshotStream {
    camera: SnapshotCamera,
}

#[async_trait]
impl CameraStream for SnapshotStream {
    async fn capture(&mut self) -> FeedResult<Vec<u8>> {
        self.camera.fetch().await
    }
}

/// Re-encode a captured image as JPEG, no wider than `max_width`
pub fn encode_still(bytes: &[u8], max_width: u32) -> FeedResult<Vec<u8>> {
    let mut img = image::load_from_memory(bytes)?;
    if img.width() > max_width {
        let height = (img.height() as u64 * max_width as u64 / img.width() as u64).max(1) as u32;
        img = img.resize_exact(max_width, height, FilterType::Triangle);
    }

    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
    Ok(out.into_inner())
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    session_id: &'a str,
    image_base64: String,
}

/// POST a still to `/predict_product` and parse the prediction
pub async fn submit_frame(
    http: &reqwest::Client,
    base_url: &str,
    session_id: &str,
    jpeg: &[u8],
) -> FeedResult<RawDetection> {
    let request = PredictRequest {
        session_id,
        image_base64: STANDARD.encode(jpeg),
    };
    let response = http
        .post(format!("{}/predict_product", base_url))
        .json(&request)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::NetworkUnavailable(format!("predict_product returned {}", status)));
    }

    Ok(response.json::<RawDetection>().await?)
}

pub(crate) struct CaptureSettings {
    pub base_url: String,
    pub interval: Duration,
    pub max_width: u32,
}

/// Open the camera, then capture and submit one frame per tick
///
/// Without a camera, or when opening fails, reports `MediaAccessDenied`
/// and ends; the mode has to be started again to retry.
pub(crate) async fn run(
    shared: FeedHandle,
    camera: Option<Arc<dyn CameraSource>>,
    http: reqwest::Client,
    settings: CaptureSettings,
) {
    let opened = match camera {
        Some(camera) => camera.open().await,
        None => Err(FeedError::MediaAccessDenied("no camera device configured".to_string())),
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Camera unavailable: {}", e);
            shared.emit(FeedEvent::MediaAccessDenied(e.to_string()));
            shared.set_state(ConnectionState::Disconnected);
            return;
        }
    };
    shared.set_state(ConnectionState::Connected);

    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let jpeg = match stream.capture().await.and_then(|raw| encode_still(&raw, settings.max_width)) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                debug!("Capture failed: {}", e);
                continue;
            }
        };

        let submitted = submit_frame(&http, &settings.base_url, shared.session_id(), &jpeg).await;
        shared.show_frame(Frame::new(jpeg, "image/jpeg"));

        match submitted {
            Ok(raw) => shared.handle_detection(raw),
            Err(e) => debug!("Recognition submit failed: {}", e),
        }
    }
}
