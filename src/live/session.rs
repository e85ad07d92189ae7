//! Session lifecycle manager
//!
//! Owns the channel, the capture devices, playback, timers and the vision
//! samplers, and serializes everything that can happen to them into one
//! cooperative event loop. Connection setup runs as a pending future the loop
//! polls next to its timers and commands; all per-frame work is
//! fire-and-forget.

use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use super::channel::{ChannelConnector, ChannelRequest, LiveChannel};
use super::devices::DeviceProvider;
use super::instructions::{system_instruction, timer_finished_message};
use super::protocol::{ClientMessage, ServerEvent, Setup};
use super::state::{ConnectionState, Transition};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::journal::{LogEntry, LogLevel, SessionLog, VisionLog, VisionLogEntry};
use crate::recipe::RecipeContext;
use crate::services::{CapabilityToken, TokenCache, TokenProvider};
use crate::timers::{format_remaining, Timer, TimerEngine, TICK_INTERVAL};
use crate::tools::{declarations, ToolDispatcher, ToolEffect, ToolInvocation};
use crate::vision::{
    encode_jpeg, FrameAnalysis, FrameAnalyzer, SuggestionDecision, SuggestionFilter, VideoSource,
    JPEG_MIME_TYPE,
};
use crate::voice::{
    encode_frame_base64, input_mime_type, AudioBuffer, Microphone, OutputDevice,
    PlaybackScheduler, VolumeMeter,
};
use crate::{Error, Result};

/// UI-rate loop: volume sampling and playback completion
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const COMMAND_QUEUE_CAPACITY: usize = 32;
const EVENT_QUEUE_CAPACITY: usize = 256;
const MIC_QUEUE_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 256;

/// User intents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    CameraOn,
    CameraOff,
    CreateTimer { label: String, duration: NonZeroU32 },
    /// Timer reference: id, unique id prefix, or 1-based list position
    PauseTimer(String),
    ResumeTimer(String),
    ResetTimer(String),
    DeleteTimer(String),
    ListTimers,
    Stats,
    Quit,
}

/// Who said something
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// Counters collected when diagnostics are enabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub connects: u64,
    pub audio_frames_sent: u64,
    pub send_failures: u64,
    pub audio_chunks_received: u64,
    pub audio_decode_failures: u64,
    pub interruptions: u64,
    pub tool_calls: u64,
    pub video_frames_relayed: u64,
    pub analyses_run: u64,
}

/// Externally observable changes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    CameraChanged(bool),
    Speaking(bool),
    Log(LogEntry),
    Observation(VisionLogEntry),
    TimerCreated(Timer),
    TimerUpdated(Timer),
    TimerDeleted(Timer),
    TimerFinished(Timer),
    Timers(Vec<Timer>),
    Transcript { speaker: Speaker, text: String },
    TurnComplete,
    /// The channel went away; the user may reconnect
    Disconnected { reason: String, can_retry: bool },
    Stats(SessionStats),
}

/// Collaborators injected at construction
pub struct SessionDeps {
    pub tokens: Arc<dyn TokenProvider>,
    pub connector: Arc<dyn ChannelConnector>,
    pub devices: Box<dyn DeviceProvider>,
    pub output: Box<dyn OutputDevice>,
    pub analyzer: Arc<dyn FrameAnalyzer>,
}

/// One awaited step of a connection attempt
enum SetupStep {
    Token(Result<CapabilityToken>),
    Channel(Result<Box<dyn LiveChannel>>),
}

type PendingSetup = Pin<Box<dyn Future<Output = SetupStep>>>;

/// Cloneable handle for driving a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    volume: VolumeMeter,
    recipe: RecipeContext,
}

impl SessionHandle {
    /// Queue a command
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` if the session loop has stopped
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Channel("session stopped".to_string()))
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Latest microphone volume (0-1)
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume.level()
    }

    /// The recipe context the session reads from
    #[must_use]
    pub const fn recipe(&self) -> &RecipeContext {
        &self.recipe
    }
}

/// The live session orchestrator
pub struct LiveSession {
    config: Config,
    state: ConnectionState,
    tokens: TokenCache,
    connector: Arc<dyn ChannelConnector>,
    devices: Box<dyn DeviceProvider>,
    analyzer: Arc<dyn FrameAnalyzer>,
    playback: PlaybackScheduler<Box<dyn OutputDevice>>,
    microphone: Option<Box<dyn Microphone>>,
    camera: Option<Box<dyn VideoSource>>,
    channel: Option<Box<dyn LiveChannel>>,
    channel_events: Option<mpsc::Receiver<ServerEvent>>,
    pending_setup: Option<PendingSetup>,
    connect_deadline: Option<Instant>,
    timers: TimerEngine,
    recipe: RecipeContext,
    observations: VisionLog,
    log: SessionLog,
    suggestions: SuggestionFilter,
    stats: Option<SessionStats>,
    speaking: bool,
    volume: VolumeMeter,
    frames_tx: mpsc::Sender<Vec<f32>>,
    frames_rx: mpsc::Receiver<Vec<f32>>,
    analysis_tx: mpsc::Sender<Result<FrameAnalysis>>,
    analysis_rx: mpsc::Receiver<Result<FrameAnalysis>>,
    analysis_in_flight: bool,
    commands_tx: mpsc::Sender<SessionCommand>,
    commands_rx: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl LiveSession {
    #[must_use]
    pub fn new(config: Config, deps: SessionDeps, recipe: RecipeContext) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(MIC_QUEUE_CAPACITY);
        let (analysis_tx, analysis_rx) = mpsc::channel(1);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            state: ConnectionState::Disconnected,
            tokens: TokenCache::new(deps.tokens),
            connector: deps.connector,
            devices: deps.devices,
            analyzer: deps.analyzer,
            playback: PlaybackScheduler::new(deps.output),
            microphone: None,
            camera: None,
            channel: None,
            channel_events: None,
            pending_setup: None,
            connect_deadline: None,
            timers: TimerEngine::new(),
            recipe,
            observations: VisionLog::new(config.logs.observation_capacity),
            log: SessionLog::new(config.logs.session_log_capacity),
            suggestions: SuggestionFilter::new(config.vision.suppression_window),
            stats: config.behaviors.diagnostics.then(SessionStats::default),
            speaking: false,
            volume: VolumeMeter::new(),
            frames_tx,
            frames_rx,
            analysis_tx,
            analysis_rx,
            analysis_in_flight: false,
            commands_tx,
            commands_rx,
            events,
            config,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands_tx.clone(),
            events: self.events.clone(),
            volume: self.volume.clone(),
            recipe: self.recipe.clone(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn camera_active(&self) -> bool {
        self.camera.is_some()
    }

    #[must_use]
    pub const fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    #[must_use]
    pub const fn timers(&self) -> &TimerEngine {
        &self.timers
    }

    #[must_use]
    pub const fn observations(&self) -> &VisionLog {
        &self.observations
    }

    #[must_use]
    pub const fn log(&self) -> &SessionLog {
        &self.log
    }

    #[must_use]
    pub const fn stats(&self) -> Option<SessionStats> {
        self.stats
    }

    #[must_use]
    pub const fn playback(&self) -> &PlaybackScheduler<Box<dyn OutputDevice>> {
        &self.playback
    }

    /// Drive the session until `Quit` or every handle is dropped
    ///
    /// # Errors
    ///
    /// Currently infallible; failures are reported as session events
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) -> Result<()> {
        let mut tick = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut relay = tokio::time::interval(self.config.vision.relay_interval);
        relay.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut analysis = tokio::time::interval(self.config.vision.analysis_interval);
        analysis.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut output = tokio::time::interval(OUTPUT_POLL_INTERVAL);
        output.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("session loop started");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(SessionCommand::Quit) | None => break,
                    Some(command) => self.handle_command(command),
                },
                step = next_setup_step(&mut self.pending_setup), if self.pending_setup.is_some() => {
                    self.pending_setup = None;
                    if let Err(e) = self.advance_setup(step) {
                        tracing::debug!(error = %e, "connect attempt failed");
                    }
                }
                Some(event) = next_channel_event(&mut self.channel_events) => {
                    self.handle_server_event(event);
                }
                Some(frame) = self.frames_rx.recv() => self.on_audio_frame(&frame),
                Some(result) = self.analysis_rx.recv() => self.handle_analysis(result),
                _ = tick.tick() => self.on_tick(),
                _ = relay.tick(), if self.camera.is_some() => self.relay_frame(),
                _ = analysis.tick(), if self.camera.is_some() => self.start_analysis(),
                _ = output.tick() => self.poll_output(),
                () = wait_for(self.connect_deadline), if self.connect_deadline.is_some() => {
                    self.on_connect_timeout();
                }
            }
        }

        self.shutdown();
        tracing::info!("session loop stopped");
        Ok(())
    }

    /// Apply one user intent
    ///
    /// `Connect` only starts the attempt; the run loop drives its setup.
    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => {
                self.begin_connect();
            }
            SessionCommand::Disconnect => self.disconnect(),
            SessionCommand::CameraOn => {
                self.acquire_camera();
            }
            SessionCommand::CameraOff => self.release_camera(),
            SessionCommand::CreateTimer { label, duration } => {
                let timer = self.timers.create(label, duration);
                self.record(
                    LogLevel::Info,
                    format!("Timer '{}' started for {}.", timer.label, format_remaining(timer.duration_seconds)),
                );
                self.emit(SessionEvent::TimerCreated(timer));
            }
            SessionCommand::PauseTimer(reference) => {
                self.update_timer(&reference, TimerEngine::pause);
            }
            SessionCommand::ResumeTimer(reference) => {
                self.update_timer(&reference, TimerEngine::resume);
            }
            SessionCommand::ResetTimer(reference) => {
                self.update_timer(&reference, TimerEngine::reset);
            }
            SessionCommand::DeleteTimer(reference) => {
                let removed = self
                    .resolve_timer(&reference)
                    .and_then(|id| self.timers.delete(&id));
                match removed {
                    Some(timer) => {
                        self.record(LogLevel::Info, format!("Timer '{}' deleted.", timer.label));
                        self.emit(SessionEvent::TimerDeleted(timer));
                    }
                    None => self.record(LogLevel::Warn, format!("No timer matches '{reference}'.")),
                }
            }
            SessionCommand::ListTimers => {
                self.emit(SessionEvent::Timers(self.timers.list().to_vec()));
            }
            SessionCommand::Stats => match self.stats {
                Some(stats) => self.emit(SessionEvent::Stats(stats)),
                None => self.record(LogLevel::Info, "Diagnostics are disabled."),
            },
            SessionCommand::Quit => self.shutdown(),
        }
    }

    /// Start a connection attempt unless one is already connecting or connected
    ///
    /// Returns whether an attempt was started. The connect deadline covers
    /// token issuance, channel setup and the open acknowledgment.
    pub fn begin_connect(&mut self) -> bool {
        let Some(next) = self.state.next(Transition::Connect) else {
            tracing::debug!(state = %self.state, "connect ignored");
            return false;
        };

        self.teardown(false);
        self.set_state(next);
        self.record(LogLevel::Info, "Connecting to live session...");
        self.connect_deadline = Some(Instant::now() + self.config.session.connect_timeout);

        let tokens = self.tokens.clone();
        self.pending_setup = Some(Box::pin(async move {
            SetupStep::Token(tokens.acquire().await)
        }));
        true
    }

    /// Start an attempt and drive its setup to completion without the run loop
    ///
    /// # Errors
    ///
    /// Returns the failure that aborted the attempt; the session is back to
    /// `Disconnected` and the failure has been reported as events
    #[allow(clippy::future_not_send)]
    pub async fn connect(&mut self) -> Result<()> {
        if !self.begin_connect() {
            return Ok(());
        }
        while let Some(setup) = self.pending_setup.as_mut() {
            let step = setup.await;
            self.pending_setup = None;
            self.advance_setup(step)?;
        }
        Ok(())
    }

    /// Apply a finished setup step, queueing the next one if any
    fn advance_setup(&mut self, step: SetupStep) -> Result<()> {
        let result = match step {
            SetupStep::Token(token) => token.and_then(|token| self.prepare_channel(token)),
            SetupStep::Channel(channel) => channel.map(|channel| {
                self.channel = Some(channel);
            }),
        };
        if let Err(e) = &result {
            self.abort(e);
        }
        result
    }

    /// Claim the devices and start opening the channel
    fn prepare_channel(&mut self, token: CapabilityToken) -> Result<()> {
        let microphone = self.devices.open_microphone()?;
        self.microphone = Some(microphone);
        self.acquire_camera();

        let recipe = self.recipe.snapshot();
        let behaviors = self.config.behaviors;
        let setup = Setup::new(
            self.config.session.model.clone(),
            self.config.session.voice.clone(),
            system_instruction(recipe.as_ref(), behaviors.proactive_timers),
            declarations(),
            behaviors.transcripts,
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        self.channel_events = Some(events_rx);

        let request = ChannelRequest {
            url: self.config.endpoints.live_url.clone(),
            token,
            setup,
        };
        let connector = Arc::clone(&self.connector);
        self.pending_setup = Some(Box::pin(async move {
            SetupStep::Channel(connector.open(request, events_tx).await)
        }));
        Ok(())
    }

    /// User-initiated disconnect; releases the camera
    pub fn disconnect(&mut self) {
        let Some(next) = self.state.next(Transition::Disconnect) else {
            tracing::debug!(state = %self.state, "disconnect ignored");
            return;
        };
        self.teardown(true);
        self.set_state(next);
        self.record(LogLevel::Info, "Disconnected.");
    }

    /// Give up on a connection that did not open in time
    pub fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.state != ConnectionState::Connecting {
            return;
        }
        let timeout = self.config.session.connect_timeout.as_secs();
        self.abort(&Error::Channel(format!("session did not open within {timeout}s")));
    }

    /// React to one channel event
    pub fn handle_server_event(&mut self, event: ServerEvent) {
        let lifecycle = matches!(
            event,
            ServerEvent::Open | ServerEvent::Closed { .. } | ServerEvent::Failed(_)
        );
        if !lifecycle && !self.state.is_connected() {
            tracing::debug!(state = %self.state, ?event, "ignoring event outside a connected session");
            return;
        }

        match event {
            ServerEvent::Open => self.on_open(),
            ServerEvent::Audio { mime_type, data } => self.on_audio(&mime_type, &data),
            ServerEvent::Text(text) => tracing::debug!(%text, "model text"),
            ServerEvent::Interrupted => self.on_interrupted(),
            ServerEvent::TurnComplete => {
                tracing::debug!("turn complete");
                self.emit(SessionEvent::TurnComplete);
            }
            ServerEvent::ToolCalls(calls) => self.on_tool_calls(&calls),
            ServerEvent::ToolCallsCancelled(ids) => {
                tracing::debug!(?ids, "tool calls cancelled after they were answered");
            }
            ServerEvent::InputTranscript(text) => self.on_transcript(Speaker::User, text),
            ServerEvent::OutputTranscript(text) => self.on_transcript(Speaker::Assistant, text),
            ServerEvent::GoAway { time_left } => self.record(
                LogLevel::Warn,
                format!(
                    "The server will end this session soon (time left: {}).",
                    time_left.as_deref().unwrap_or("unknown")
                ),
            ),
            ServerEvent::Closed { code, reason } => {
                self.on_remote_closed(code, &reason, Transition::RemoteClose);
            }
            ServerEvent::Failed(reason) => {
                self.on_remote_closed(None, &reason, Transition::RemoteError);
            }
        }
    }

    fn on_open(&mut self) {
        let Some(next) = self.state.next(Transition::RemoteOpen) else {
            return;
        };
        self.connect_deadline = None;
        self.set_state(next);
        self.bump(|s| s.connects += 1);

        let started = self
            .microphone
            .as_mut()
            .map(|mic| mic.start(self.frames_tx.clone()));
        match started {
            Some(Ok(())) => self.record(LogLevel::Info, "Connected. Listening..."),
            Some(Err(e)) => self.record(
                LogLevel::Warn,
                format!("Connected, but the microphone did not start: {}", e.user_message()),
            ),
            None => self.record(LogLevel::Info, "Connected."),
        }
    }

    fn on_remote_closed(&mut self, code: Option<u16>, reason: &str, transition: Transition) {
        let Some(next) = self.state.next(transition) else {
            tracing::debug!(state = %self.state, "close ignored");
            return;
        };
        if signals_auth_failure(code, reason) {
            self.tokens.invalidate();
        }

        self.teardown(false);
        self.set_state(next);

        let message = match code {
            Some(code) => format!("Session closed ({code}): {reason}"),
            None => format!("Session closed: {reason}"),
        };
        self.record(LogLevel::Warn, message.clone());
        self.emit(SessionEvent::Disconnected {
            reason: message,
            can_retry: true,
        });
    }

    /// Tear down after a failed attempt and report it
    fn abort(&mut self, error: &Error) {
        if error.kind() == ErrorKind::Auth {
            self.tokens.invalidate();
        }
        self.teardown(false);
        if let Some(next) = self.state.next(Transition::RemoteError) {
            self.set_state(next);
        }

        let message = error.user_message();
        self.record(LogLevel::Error, message.clone());
        self.emit(SessionEvent::Disconnected {
            reason: message,
            can_retry: error.is_retryable(),
        });
    }

    fn on_audio(&mut self, mime_type: &str, data: &str) {
        self.bump(|s| s.audio_chunks_received += 1);
        match AudioBuffer::from_base64_pcm16(data, mime_type) {
            Ok(buffer) => {
                self.playback.schedule(&buffer);
                self.set_speaking(true);
            }
            Err(e) => {
                self.bump(|s| s.audio_decode_failures += 1);
                tracing::warn!(error = %e, "dropping undecodable audio chunk");
            }
        }
    }

    fn on_interrupted(&mut self) {
        let stopped = self.playback.interrupt();
        self.bump(|s| s.interruptions += 1);
        tracing::debug!(stopped, "barge-in");
        self.set_speaking(false);
    }

    fn on_tool_calls(&mut self, calls: &[ToolInvocation]) {
        tracing::info!(
            count = calls.len(),
            names = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "resolving tool calls"
        );

        let mut dispatcher =
            ToolDispatcher::new(&mut self.timers, &self.recipe, &mut self.observations);
        let results = dispatcher.dispatch_batch(calls);
        let effects = dispatcher.into_effects();
        self.bump(|s| s.tool_calls += calls.len() as u64);

        for effect in effects {
            match effect {
                ToolEffect::TimerCreated(timer) => {
                    self.record(
                        LogLevel::Info,
                        format!(
                            "Timer '{}' started for {}.",
                            timer.label,
                            format_remaining(timer.duration_seconds)
                        ),
                    );
                    self.emit(SessionEvent::TimerCreated(timer));
                }
                ToolEffect::ObservationLogged(entry) => {
                    self.emit(SessionEvent::Observation(entry));
                }
            }
        }

        self.send(ClientMessage::tool_results(results));
    }

    fn on_transcript(&mut self, speaker: Speaker, text: String) {
        if !self.config.behaviors.transcripts {
            return;
        }
        tracing::info!(?speaker, %text, "transcript");
        self.emit(SessionEvent::Transcript { speaker, text });
    }

    /// Forward one microphone frame, best-effort
    pub fn on_audio_frame(&mut self, frame: &[f32]) {
        if !self.state.is_connected() {
            return;
        }
        let message = ClientMessage::media(input_mime_type(), encode_frame_base64(frame));
        if self.send(message) {
            self.bump(|s| s.audio_frames_sent += 1);
        }
    }

    /// One-second timer tick
    pub fn on_tick(&mut self) {
        for timer in self.timers.tick() {
            self.record(LogLevel::Info, format!("Timer '{}' finished!", timer.label));
            if self.state.is_connected() {
                self.send(ClientMessage::user_text(timer_finished_message(&timer.label)));
            }
            self.emit(SessionEvent::TimerFinished(timer));
        }
    }

    /// Relay the current camera frame to the channel
    pub fn relay_frame(&mut self) {
        if !self.state.is_connected() || self.channel.is_none() {
            return;
        }
        let (max_dimension, quality) = (
            self.config.vision.relay_max_dimension,
            self.config.vision.relay_quality,
        );
        let Some(jpeg) = self.capture_jpeg(max_dimension, quality) else {
            return;
        };

        let data = base64::engine::general_purpose::STANDARD.encode(jpeg);
        if self.send(ClientMessage::media(JPEG_MIME_TYPE, data)) {
            self.bump(|s| s.video_frames_relayed += 1);
        }
    }

    /// Send the current frame for still analysis unless one is already pending
    pub fn start_analysis(&mut self) {
        if self.analysis_in_flight {
            return;
        }
        let (max_dimension, quality) = (
            self.config.vision.analysis_max_dimension,
            self.config.vision.analysis_quality,
        );
        let Some(jpeg) = self.capture_jpeg(max_dimension, quality) else {
            return;
        };

        let analyzer = Arc::clone(&self.analyzer);
        let recipe = self.recipe.snapshot();
        let results = self.analysis_tx.clone();
        self.analysis_in_flight = true;
        self.bump(|s| s.analyses_run += 1);

        tokio::spawn(async move {
            let result = analyzer.analyze(jpeg, recipe).await;
            if results.send(result).await.is_err() {
                tracing::debug!("analysis result dropped, session gone");
            }
        });
    }

    /// Grab and compress a frame; `None` when nothing is showing
    fn capture_jpeg(&mut self, max_dimension: u32, quality: u8) -> Option<Vec<u8>> {
        let camera = self.camera.as_mut()?;
        let (width, height) = camera.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let frame = camera.current_frame()?;
        match encode_jpeg(&frame, max_dimension, quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::debug!(error = %e, "frame skipped");
                None
            }
        }
    }

    /// Handle a finished analysis request
    ///
    /// Results that land after the camera was turned off are dropped.
    pub fn handle_analysis(&mut self, result: Result<FrameAnalysis>) {
        self.analysis_in_flight = false;
        if self.camera.is_none() {
            tracing::debug!(ok = result.is_ok(), "analysis result dropped, camera off");
            return;
        }
        match result {
            Ok(analysis) => self.apply_analysis(analysis, std::time::Instant::now()),
            Err(e) => self.record(
                LogLevel::Warn,
                format!("Frame analysis failed: {}", e.user_message()),
            ),
        }
    }

    /// Log a description and act on its timer suggestion as of `now`
    pub fn apply_analysis(&mut self, analysis: FrameAnalysis, now: std::time::Instant) {
        tracing::info!(degraded = analysis.degraded, description = %analysis.description, "frame described");
        let entry = VisionLogEntry::now(analysis.description);
        self.observations.push(entry.clone());
        self.emit(SessionEvent::Observation(entry));

        let Some(suggestion) = analysis.timer_suggestion else {
            return;
        };
        if !self.config.behaviors.proactive_timers {
            tracing::debug!(label = %suggestion.label, "proactive timers disabled");
            return;
        }

        match self.suggestions.evaluate(&suggestion, &self.timers, now) {
            SuggestionDecision::Create { label, duration } => {
                let timer = self.timers.create(label, duration);
                let reason = suggestion.reason.as_deref().unwrap_or("suggested by vision");
                self.record(
                    LogLevel::Info,
                    format!(
                        "Auto-created timer '{}' for {} ({reason}).",
                        timer.label,
                        format_remaining(timer.duration_seconds)
                    ),
                );
                self.emit(SessionEvent::TimerCreated(timer));
            }
            SuggestionDecision::Rejected(rejection) => {
                tracing::debug!(label = %suggestion.label, %rejection, "timer suggestion ignored");
            }
        }
    }

    /// Sample the microphone volume and retire finished playback
    ///
    /// Runs on the 50 ms output poll, so the speaking indicator clears on the
    /// first poll after the last unit ends rather than at its exact end time.
    pub fn poll_output(&mut self) {
        let level = self.microphone.as_ref().map_or(0.0, |mic| mic.meter().level());
        self.volume.set(level);

        let finished = self.playback.reap();
        if !finished.is_empty() && !self.playback.is_speaking() {
            self.set_speaking(false);
        }
    }

    /// Acquire the camera if it is not already active
    fn acquire_camera(&mut self) -> bool {
        if self.camera.is_some() {
            tracing::debug!("reusing active camera");
            return true;
        }
        let device = self.config.session.camera_device.clone();
        match self
            .devices
            .open_camera(device.as_deref(), self.config.session.wide_angle)
        {
            Ok(camera) => {
                self.record(LogLevel::Info, format!("Camera on ({}).", camera.label()));
                self.camera = Some(camera);
                self.emit(SessionEvent::CameraChanged(true));
                true
            }
            Err(e) => {
                self.record(
                    LogLevel::Warn,
                    format!("{} Continuing audio-only.", e.user_message()),
                );
                false
            }
        }
    }

    fn release_camera(&mut self) {
        if self.camera.take().is_some() {
            self.suggestions.clear();
            self.record(LogLevel::Info, "Camera off.");
            self.emit(SessionEvent::CameraChanged(false));
        }
    }

    /// Stop everything tied to the current channel; safe to call repeatedly
    fn teardown(&mut self, release_camera: bool) {
        if let Some(mut mic) = self.microphone.take() {
            mic.stop();
        }
        self.volume.reset();
        while self.frames_rx.try_recv().is_ok() {}

        self.playback.interrupt();
        self.set_speaking(false);

        let had_channel = match self.channel.take() {
            Some(mut channel) => {
                channel.close();
                true
            }
            None => false,
        };
        self.channel_events = None;
        if self.pending_setup.take().is_some() {
            tracing::debug!("pending connection setup dropped");
        }
        self.connect_deadline = None;

        if release_camera {
            self.release_camera();
        }

        if had_channel {
            if let Some(stats) = self.stats {
                self.record(LogLevel::Info, format!("Session stats: {stats:?}"));
            }
        }
    }

    /// Final teardown when the loop exits
    fn shutdown(&mut self) {
        self.teardown(true);
        self.set_state(ConnectionState::Disconnected);
    }

    fn update_timer(&mut self, reference: &str, action: fn(&mut TimerEngine, &str) -> bool) {
        let Some(id) = self.resolve_timer(reference) else {
            self.record(LogLevel::Warn, format!("No timer matches '{reference}'."));
            return;
        };
        if action(&mut self.timers, &id) {
            if let Some(timer) = self.timers.get(&id).cloned() {
                self.emit(SessionEvent::TimerUpdated(timer));
            }
        }
    }

    /// Resolve an id, unique id prefix or 1-based position to a timer id
    #[must_use]
    pub fn resolve_timer(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let timers = self.timers.list();
        if let Some(timer) = timers.iter().find(|t| t.id == reference) {
            return Some(timer.id.clone());
        }
        if let Ok(position) = reference.parse::<usize>() {
            return position
                .checked_sub(1)
                .and_then(|i| timers.get(i))
                .map(|t| t.id.clone());
        }
        let mut matches = timers.iter().filter(|t| t.id.starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some(timer), None) => Some(timer.id.clone()),
            _ => None,
        }
    }

    fn send(&mut self, message: ClientMessage) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        let kind = message.kind();
        match channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(kind, error = %e, "send dropped");
                self.bump(|s| s.send_failures += 1);
                false
            }
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        tracing::info!(from = %self.state, to = %next, "connection state changed");
        self.state = next;
        self.emit(SessionEvent::StateChanged(next));
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.speaking != speaking {
            self.speaking = speaking;
            self.emit(SessionEvent::Speaking(speaking));
        }
    }

    fn bump(&mut self, update: impl FnOnce(&mut SessionStats)) {
        if let Some(stats) = self.stats.as_mut() {
            update(stats);
        }
    }

    fn record(&mut self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        match level {
            LogLevel::Info => tracing::info!(message = %entry.message, "session"),
            LogLevel::Warn => tracing::warn!(message = %entry.message, "session"),
            LogLevel::Error => tracing::error!(message = %entry.message, "session"),
        }
        self.log.push(entry.clone());
        self.emit(SessionEvent::Log(entry));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn next_channel_event(
    events: &mut Option<mpsc::Receiver<ServerEvent>>,
) -> Option<ServerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_setup_step(setup: &mut Option<PendingSetup>) -> SetupStep {
    match setup {
        Some(setup) => setup.await,
        None => std::future::pending().await,
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Whether a close looks like the token was rejected
fn signals_auth_failure(code: Option<u16>, reason: &str) -> bool {
    let reason = reason.to_lowercase();
    code == Some(1008)
        || ["auth", "token", "expired", "permission", "unauthenticated"]
            .iter()
            .any(|needle| reason.contains(needle))
}
