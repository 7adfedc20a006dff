//! Polling acquisition for remote-feed mode.

use log::debug;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

use super::{ConnectionState, FeedHandle, Frame};
use crate::detection::RawDetection;
use crate::error::{FeedError, FeedResult};

/// `<base><path>?_t=<millis>` so no cache in between serves a stale copy
pub fn cache_busted(base_url: &str, path: &str) -> String {
    format!("{}{}?_t={}", base_url, path, chrono::Utc::now().timestamp_millis())
}

async fn fetch_image(http: &reqwest::Client, base_url: &str) -> FeedResult<Frame> {
    let response = http.get(cache_busted(base_url, "/latest_image")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::NetworkUnavailable(format!("latest_image returned {}", status)));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(FeedError::NetworkUnavailable("latest_image was empty".to_string()));
    }

    Ok(Frame::new(bytes.to_vec(), &content_type))
}

async fn fetch_prediction(http: &reqwest::Client, base_url: &str) -> FeedResult<RawDetection> {
    let response = http
        .get(cache_busted(base_url, "/latest_prediction"))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::NetworkUnavailable(format!("latest_prediction returned {}", status)));
    }

    Ok(response.json::<RawDetection>().await?)
}

/// Fetch the latest image every `every`, forever
///
/// A fetched image goes on display and marks the feed connected. Any
/// failure marks it disconnected and clears the display; the next tick
/// tries again.
pub(crate) async fn image_loop(shared: FeedHandle, http: reqwest::Client, base_url: String, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match fetch_image(&http, &base_url).await {
            Ok(frame) => {
                shared.show_frame(frame);
                shared.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                debug!("Image fetch failed: {}", e);
                shared.set_state(ConnectionState::Disconnected);
                shared.clear_frame();
            }
        }
    }
}

/// Fetch the latest prediction every `every`, forever
///
/// Failures are ignored; connectivity is tracked by the image loop alone.
pub(crate) async fn prediction_loop(
    shared: FeedHandle,
    http: reqwest::Client,
    base_url: String,
    every: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match fetch_prediction(&http, &base_url).await {
            Ok(raw) => shared.handle_detection(raw),
            Err(e) => debug!("Prediction fetch failed: {}", e),
        }
    }
}
