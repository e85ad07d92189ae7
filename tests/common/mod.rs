//! Shared test utilities: in-memory stand-ins for devices, the channel and services

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use serde_json::Value;
use tokio::sync::mpsc;

use sous_live::live::{
    ChannelConnector, ChannelRequest, ClientMessage, DeviceProvider, LiveChannel, ServerEvent,
    SessionDeps,
};
use sous_live::recipe::ActiveRecipeContext;
use sous_live::services::{CapabilityToken, TokenProvider};
use sous_live::vision::{FrameAnalysis, FrameAnalyzer, TimerSuggestion, VideoSource};
use sous_live::voice::{AudioBuffer, Microphone, OutputDevice, UnitId, VolumeMeter};
use sous_live::{Config, Error, LiveSession, RecipeContext, Result};

/// Output device with a hand-driven clock
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

#[derive(Default)]
struct OutputState {
    now: f64,
    started: Vec<(UnitId, f64, f64)>,
    stopped: Vec<UnitId>,
}

impl FakeOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// `(id, start, duration)` of every unit started
    #[must_use]
    pub fn started(&self) -> Vec<(UnitId, f64, f64)> {
        self.state.lock().unwrap().started.clone()
    }

    #[must_use]
    pub fn stopped(&self) -> Vec<UnitId> {
        self.state.lock().unwrap().stopped.clone()
    }
}

impl OutputDevice for FakeOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn start(&mut self, id: UnitId, buffer: &AudioBuffer, at: f64) {
        self.state
            .lock()
            .unwrap()
            .started
            .push((id, at, buffer.duration()));
    }

    fn stop(&mut self, id: UnitId) {
        self.state.lock().unwrap().stopped.push(id);
    }
}

/// Microphone that delivers frames only when a test pushes them
pub struct FakeMic {
    probe: DeviceProbe,
    meter: VolumeMeter,
}

impl Microphone for FakeMic {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()> {
        *self.probe.mic_sender.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.mic_sender.lock().unwrap().take();
    }

    fn meter(&self) -> VolumeMeter {
        self.meter.clone()
    }
}

/// Camera showing a flat colour; counts live instances
pub struct FakeCamera {
    live: Arc<AtomicUsize>,
    width: u32,
    height: u32,
}

impl VideoSource for FakeCamera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn current_frame(&mut self) -> Option<DynamicImage> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            self.width,
            self.height,
            image::Rgb([180, 90, 30]),
        )))
    }

    fn label(&self) -> String {
        "fake-camera".to_string()
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared view of what the fake devices were asked to do
#[derive(Clone, Default)]
pub struct DeviceProbe {
    pub mic_opens: Arc<AtomicUsize>,
    pub camera_opens: Arc<AtomicUsize>,
    pub live_cameras: Arc<AtomicUsize>,
    pub camera_missing: Arc<AtomicBool>,
    pub mic_missing: Arc<AtomicBool>,
    mic_sender: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
}

impl DeviceProbe {
    /// Deliver a frame as if the microphone captured it
    pub fn push_frame(&self, frame: Vec<f32>) -> bool {
        self.mic_sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.try_send(frame).is_ok())
    }

    #[must_use]
    pub fn mic_started(&self) -> bool {
        self.mic_sender.lock().unwrap().is_some()
    }
}

pub struct FakeDevices {
    probe: DeviceProbe,
}

impl DeviceProvider for FakeDevices {
    fn open_microphone(&mut self) -> Result<Box<dyn Microphone>> {
        if self.probe.mic_missing.load(Ordering::SeqCst) {
            return Err(Error::Device("no microphone".into()));
        }
        self.probe.mic_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMic {
            probe: self.probe.clone(),
            meter: VolumeMeter::new(),
        }))
    }

    fn open_camera(
        &mut self,
        _device: Option<&str>,
        _wide_angle: bool,
    ) -> Result<Box<dyn VideoSource>> {
        if self.probe.camera_missing.load(Ordering::SeqCst) {
            return Err(Error::Device("no camera".into()));
        }
        self.probe.camera_opens.fetch_add(1, Ordering::SeqCst);
        self.probe.live_cameras.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCamera {
            live: Arc::clone(&self.probe.live_cameras),
            width: 1280,
            height: 720,
        }))
    }
}

/// Channel that records everything sent on it
struct FakeChannel {
    probe: ChannelProbe,
    open: bool,
}

impl LiveChannel for FakeChannel {
    fn send(&mut self, message: ClientMessage) -> Result<()> {
        if !self.open {
            return Err(Error::Channel("closed".into()));
        }
        let value = serde_json::to_value(&message)?;
        self.probe.sent.lock().unwrap().push(value);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared view of channels opened by [`FakeConnector`]
#[derive(Clone, Default)]
pub struct ChannelProbe {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub refuse: Arc<AtomicBool>,
    pub bad_url: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<Value>>>,
    requests: Arc<Mutex<Vec<ChannelRequest>>>,
    events: Arc<Mutex<Option<mpsc::Sender<ServerEvent>>>>,
}

impl ChannelProbe {
    /// Every message sent, as JSON
    #[must_use]
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent messages that carry the given top-level key
    #[must_use]
    pub fn sent_with(&self, key: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v.get(key).is_some())
            .collect()
    }

    #[must_use]
    pub fn last_request(&self) -> Option<ChannelRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Deliver an event on the most recently opened channel
    pub async fn inject(&self, event: ServerEvent) {
        let sender = self.events.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

pub struct FakeConnector {
    probe: ChannelProbe,
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn open(
        &self,
        request: ChannelRequest,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Box<dyn LiveChannel>> {
        if self.probe.refuse.load(Ordering::SeqCst) {
            return Err(Error::Channel("connection refused".into()));
        }
        if self.probe.bad_url.load(Ordering::SeqCst) {
            return Err(Error::Config("invalid live url".into()));
        }
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.probe.requests.lock().unwrap().push(request);
        *self.probe.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeChannel {
            probe: self.probe.clone(),
            open: true,
        }))
    }
}

/// Token issuer that counts fetches and can be made slow or failing
#[derive(Clone, Default)]
pub struct FakeTokens {
    pub fetches: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub delay_ms: Arc<AtomicU64>,
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn fetch(&self) -> Result<CapabilityToken> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Auth("token endpoint unavailable".into()));
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(CapabilityToken::new(format!("token-{n}")))
    }
}

/// Analyzer that always suggests the same thing
#[derive(Clone, Default)]
pub struct FakeAnalyzer {
    pub calls: Arc<AtomicUsize>,
    pub suggestion: Arc<Mutex<Option<TimerSuggestion>>>,
}

#[async_trait]
impl FrameAnalyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        _jpeg: Vec<u8>,
        _recipe: Option<ActiveRecipeContext>,
    ) -> Result<FrameAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FrameAnalysis {
            description: "A pot on the stove".to_string(),
            timer_suggestion: self.suggestion.lock().unwrap().clone(),
            degraded: false,
        })
    }
}

/// Everything a session test needs to observe
pub struct Harness {
    pub session: LiveSession,
    pub output: FakeOutput,
    pub devices: DeviceProbe,
    pub channel: ChannelProbe,
    pub tokens: FakeTokens,
    pub analyzer: FakeAnalyzer,
    pub recipe: RecipeContext,
}

/// Build a session wired entirely to fakes
#[must_use]
pub fn harness(config: Config) -> Harness {
    let output = FakeOutput::new();
    let devices = DeviceProbe::default();
    let channel = ChannelProbe::default();
    let tokens = FakeTokens::default();
    let analyzer = FakeAnalyzer::default();
    let recipe = RecipeContext::new();

    let deps = SessionDeps {
        tokens: Arc::new(tokens.clone()),
        connector: Arc::new(FakeConnector {
            probe: channel.clone(),
        }),
        devices: Box::new(FakeDevices {
            probe: devices.clone(),
        }),
        output: Box::new(output.clone()),
        analyzer: Arc::new(analyzer.clone()),
    };

    Harness {
        session: LiveSession::new(config, deps, recipe.clone()),
        output,
        devices,
        channel,
        tokens,
        analyzer,
        recipe,
    }
}

/// Base64 PCM16 payload of `samples` zero samples
#[must_use]
pub fn silent_pcm_base64(samples: usize) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}

/// A small recipe for tool tests
#[must_use]
pub fn carbonara() -> sous_live::Recipe {
    sous_live::Recipe {
        title: "Spaghetti Carbonara".to_string(),
        ingredients: vec![
            "200g spaghetti".to_string(),
            "2 eggs".to_string(),
            "50g pecorino".to_string(),
        ],
        instructions: vec![
            "Boil salted water".to_string(),
            "Cook the spaghetti".to_string(),
            "Toss with egg and cheese".to_string(),
        ],
        servings: Some("2".to_string()),
        prep_time: None,
        cook_time: None,
    }
}
