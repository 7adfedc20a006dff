//! Detection/feed client.
//!
//! A [`FeedClient`] runs one acquisition mode at a time for one cart session:
//!
//! - **Remote feed**: frames and detections come from the recognition
//!   service, either polled over HTTP or pushed over Socket.IO.
//! - **Local capture**: frames are captured from a camera on this side and
//!   submitted for recognition.
//!
//! Every mode hands its results to the same [`DetectionPipeline`], which owns
//! the threshold and duplicate-suppression rule. Progress is reported as
//! [`FeedEvent`]s on a broadcast channel.

pub mod capture;
pub mod frame;
pub mod poll;
pub mod socket;
pub mod socketio;

use log::{debug, info};
use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cart::{Product, SharedCart};
use crate::catalog::PriceSource;
use crate::config::{FeedConfig, RemoteStrategy};
use crate::detection::{DetectionOutcome, DetectionPipeline, DetectionResult, RawDetection};

pub use capture::{CameraSource, CameraStream, SnapshotCamera};
pub use frame::{Frame, FrameSlot};

const EVENT_CAPACITY: usize = 64;

/// Acquisition mode; switching is always explicit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedMode {
    RemoteFeed,
    LocalCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the client reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    ConnectionChanged(ConnectionState),
    /// A new frame is on display; fetch it with [`FeedClient::current_frame`]
    FrameUpdated { bytes: usize },
    FrameCleared,
    Detection(DetectionResult),
    ItemAdded(Product),
    MediaAccessDenied(String),
    Error(String),
}

/// Generate a session identifier of the form `cart_xxxxxxxxx`
pub fn generate_session_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    let suffix: String = (0..9)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("cart_{}", suffix)
}

/// State shared between the client and its acquisition tasks
pub(crate) struct FeedShared {
    session_id: String,
    generation: Mutex<u64>,
    state: Mutex<ConnectionState>,
    frame: FrameSlot,
    pipeline: Mutex<DetectionPipeline>,
    events: broadcast::Sender<FeedEvent>,
}

impl FeedShared {
    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Retire every handle of the current acquisition
    fn advance_generation(&self) -> u64 {
        let mut generation = self.generation();
        *generation += 1;
        *generation
    }

    fn state_guard(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pipeline(&self) -> MutexGuard<'_, DetectionPipeline> {
        self.pipeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_guard()
    }

    pub(crate) fn emit(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state_guard();
            let changed = *state != next;
            *state = next;
            changed
        };

        if changed {
            info!("Camera feed {} is now {:?}", self.session_id, next);
            self.emit(FeedEvent::ConnectionChanged(next));
        }
    }

    pub(crate) fn show_frame(&self, frame: Frame) {
        let bytes = frame.len();
        self.frame.show(frame);
        self.emit(FeedEvent::FrameUpdated { bytes });
    }

    pub(crate) fn clear_frame(&self) {
        if self.frame.is_showing() {
            self.frame.clear();
            self.emit(FeedEvent::FrameCleared);
        }
    }

    /// Run a raw recognition payload through the pipeline
    pub(crate) fn handle_detection(&self, raw: RawDetection) {
        let (result, outcome) = {
            let mut pipeline = self.pipeline();
            let Some(outcome) = pipeline.process_raw(raw) else {
                return;
            };
            (pipeline.last_detection().cloned(), outcome)
        };

        if let Some(result) = result {
            debug!(
                "Detection for {}: {} ({:.3}) -> {:?}",
                self.session_id, result.product_name, result.confidence, outcome
            );
            self.emit(FeedEvent::Detection(result));
        }
        if let DetectionOutcome::Added(product) = outcome {
            self.emit(FeedEvent::ItemAdded(product));
        }
    }
}

/// A running acquisition's access to the client state
///
/// Every update is made under the generation lock and is discarded once the
/// client has stopped or switched, so a task that is still finishing a tick
/// after its abort cannot touch the new mode's state or the cart.
#[derive(Clone)]
pub(crate) struct FeedHandle {
    shared: Arc<FeedShared>,
    generation: u64,
}

impl FeedHandle {
    fn if_current(&self, update: impl FnOnce(&FeedShared)) {
        let current = self.shared.generation();
        if *current == self.generation {
            update(&self.shared);
        } else {
            debug!("Dropping update from a stopped acquisition of {}", self.shared.session_id);
        }
    }

    pub(crate) fn session_id(&self) -> &str {
        self.shared.session_id()
    }

    pub(crate) fn emit(&self, event: FeedEvent) {
        self.if_current(|shared| shared.emit(event));
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.if_current(|shared| shared.set_state(next));
    }

    pub(crate) fn show_frame(&self, frame: Frame) {
        self.if_current(|shared| shared.show_frame(frame));
    }

    pub(crate) fn clear_frame(&self) {
        self.if_current(|shared| shared.clear_frame());
    }

    pub(crate) fn handle_detection(&self, raw: RawDetection) {
        self.if_current(|shared| shared.handle_detection(raw));
    }
}

/// Running tasks of one mode
///
/// Dropping it aborts every task, which drops the sockets, camera streams
/// and timers they own.
struct Acquisition {
    mode: FeedMode,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Detection/feed client for one cart session
pub struct FeedClient {
    shared: Arc<FeedShared>,
    config: FeedConfig,
    http: reqwest::Client,
    camera: Option<Arc<dyn CameraSource>>,
    acquisition: Option<Acquisition>,
}

impl FeedClient {
    /// Create an idle client
    ///
    /// # Arguments
    /// * `session_id` - Cart/session identifier used to correlate detections
    /// * `config` - Endpoints, intervals and threshold
    /// * `cart` - The cart auto-detected products are added to
    /// * `pricing` - Price source for auto-added products
    pub fn new(
        session_id: &str,
        config: FeedConfig,
        cart: SharedCart,
        pricing: Arc<dyn PriceSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pipeline = DetectionPipeline::new(cart, pricing, config.confidence_threshold);

        let camera = config
            .camera_url
            .as_deref()
            .map(|url| Arc::new(SnapshotCamera::new(url)) as Arc<dyn CameraSource>);

        FeedClient {
            shared: Arc::new(FeedShared {
                session_id: session_id.to_string(),
                generation: Mutex::new(0),
                state: Mutex::new(ConnectionState::Disconnected),
                frame: FrameSlot::new(),
                pipeline: Mutex::new(pipeline),
                events,
            }),
            config,
            http: reqwest::Client::new(),
            camera,
            acquisition: None,
        }
    }

    /// Use `camera` for local capture instead of the configured one
    pub fn with_camera(mut self, camera: Arc<dyn CameraSource>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn session_id(&self) -> &str {
        self.shared.session_id()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    pub fn mode(&self) -> Option<FeedMode> {
        self.acquisition.as_ref().map(|a| a.mode)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    pub fn last_detection(&self) -> Option<DetectionResult> {
        self.shared.pipeline().last_detection().cloned()
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.shared.frame.current()
    }

    /// Start acquiring in `mode`, tearing down any running mode first
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Examples
    /// ```no_run
    /// use smartcart::SharedCart;
    /// use smartcart::catalog::PlaceholderPricing;
    /// use smartcart::config::FeedConfig;
    /// use smartcart::feed::{FeedClient, FeedEvent, FeedMode};
    /// use std::sync::Arc;
    ///
    /// # async fn run() {
    /// let cart = SharedCart::default();
    /// let mut client = FeedClient::new("cart_abc123xyz", FeedConfig::default(), cart, Arc::new(PlaceholderPricing));
    /// let mut events = client.subscribe();
    /// client.start(FeedMode::RemoteFeed);
    ///
    /// match events.recv().await {
    ///     Ok(FeedEvent::ConnectionChanged(state)) => println!("Feed is {:?}", state),
    ///     Ok(other) => println!("Feed reported {:?}", other),
    ///     Err(e) => eprintln!("Feed closed: {}", e),
    /// }
    /// # }
    /// ```
    pub fn start(&mut self, mode: FeedMode) {
        self.stop();
        self.shared.set_state(ConnectionState::Connecting);

        let tasks = match mode {
            FeedMode::RemoteFeed => self.spawn_remote(),
            FeedMode::LocalCapture => self.spawn_local(),
        };

        info!("Started {:?} for {}", mode, self.session_id());
        self.acquisition = Some(Acquisition { mode, tasks });
    }

    /// Switch to `mode`; a switch to the running mode restarts it
    pub fn switch_mode(&mut self, mode: FeedMode) {
        self.start(mode);
    }

    /// Stop the running mode, if any
    pub fn stop(&mut self) {
        self.shared.advance_generation();
        if let Some(acquisition) = self.acquisition.take() {
            info!("Stopping {:?} for {}", acquisition.mode, self.session_id());
            drop(acquisition);
        }
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.clear_frame();
    }

    // Handle for tasks of the acquisition about to start
    fn handle(&self) -> FeedHandle {
        FeedHandle {
            shared: self.shared.clone(),
            generation: *self.shared.generation(),
        }
    }

    fn spawn_remote(&self) -> Vec<JoinHandle<()>> {
        let base = self.config.api_url.clone();
        match self.config.remote_strategy {
            RemoteStrategy::Poll => vec![
                tokio::spawn(poll::image_loop(
                    self.handle(),
                    self.http.clone(),
                    base.clone(),
                    self.config.image_interval(),
                )),
                tokio::spawn(poll::prediction_loop(
                    self.handle(),
                    self.http.clone(),
                    base,
                    self.config.prediction_interval(),
                )),
            ],
            RemoteStrategy::Socket => vec![tokio::spawn(socket::run(
                self.handle(),
                base,
                self.config.reconnect_attempts,
            ))],
        }
    }

    fn spawn_local(&self) -> Vec<JoinHandle<()>> {
        let settings = capture::CaptureSettings {
            base_url: self.config.api_url.clone(),
            interval: self.config.capture_interval(),
            max_width: self.config.capture_max_width,
        };
        vec![tokio::spawn(capture::run(
            self.handle(),
            self.camera.clone(),
            self.http.clone(),
            settings,
        ))]
    }
}
