use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use sous_live::live::{SystemDevices, WsConnector};
use sous_live::services::HttpTokenProvider;
use sous_live::timers::format_remaining;
use sous_live::vision::AnalysisClient;
use sous_live::voice::{
    AudioBuffer, AudioCapture, Microphone, OUTPUT_SAMPLE_RATE, OutputDevice, PlaybackScheduler,
    SAMPLE_RATE, SilentOutput, SpeakerOutput, samples_to_wav, volume_level,
};
use sous_live::{
    Config, ContentKind, LiveSession, LogLevel, Recipe, RecipeContext, RecipeExtractor,
    SessionCommand, SessionDeps, SessionEvent, SessionHandle,
};

/// Sous - hands-free live cooking assistant
#[derive(Parser)]
#[command(name = "sous", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Token endpoint override
    #[arg(long, global = true)]
    token_url: Option<String>,

    /// Live endpoint override
    #[arg(long, global = true)]
    live_url: Option<String>,

    /// Still-analysis endpoint override
    #[arg(long, global = true)]
    analysis_url: Option<String>,

    /// Recipe extraction endpoint override
    #[arg(long, global = true)]
    extract_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live session (default)
    Run(RunArgs),
    /// Extract a recipe from a URL, image file or text
    Extract {
        /// URL, path to an image, or recipe text
        input: String,
        /// Print the recipe as JSON (usable with `run --recipe-file`)
        #[arg(long)]
        json: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Where to write the captured audio
        #[arg(short, long, default_value = "sous-mic-test.wav")]
        output: PathBuf,
    },
    /// Test gapless speaker output
    TestSpeaker,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Recipe JSON file to make active
    #[arg(long)]
    recipe_file: Option<PathBuf>,

    /// Recipe URL to extract and make active
    #[arg(long, conflicts_with = "recipe_file")]
    recipe_url: Option<String>,

    /// Camera snapshot file (JPEG/PNG refreshed by a capture tool)
    #[arg(long)]
    camera: Option<String>,

    /// Prefer the wide-angle lens
    #[arg(long)]
    wide_angle: bool,

    /// Do not open the speakers
    #[arg(long)]
    silent: bool,

    /// Connect immediately
    #[arg(long)]
    connect: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,sous_live=info",
        1 => "info,sous_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.token_url {
        config.endpoints.token_url = url;
    }
    if let Some(url) = cli.live_url {
        config.endpoints.live_url = url;
    }
    if let Some(url) = cli.analysis_url {
        config.endpoints.analysis_url = url;
    }
    if let Some(url) = cli.extract_url {
        config.endpoints.extraction_url = url;
    }

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run_session(config, args).await,
        Command::Extract { input, json } => extract(&config, &input, json).await,
        Command::TestMic { duration, output } => test_mic(duration, &output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

#[allow(clippy::future_not_send)]
async fn run_session(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    if args.camera.is_some() {
        config.session.camera_device = args.camera;
    }
    config.session.wide_angle |= args.wide_angle;
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let recipe = RecipeContext::new();
    if let Some(path) = &args.recipe_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: Recipe = serde_json::from_str(&text).context("recipe file is not valid JSON")?;
        recipe.set_recipe(parsed);
    } else if let Some(url) = &args.recipe_url {
        let extractor = RecipeExtractor::new(config.endpoints.extraction_url.clone());
        recipe.set_recipe(extractor.extract(url, ContentKind::Url).await?);
    }

    let output: Box<dyn OutputDevice> = if args.silent {
        Box::new(SilentOutput::new())
    } else {
        match SpeakerOutput::new() {
            Ok(speaker) => Box::new(speaker),
            Err(e) => {
                tracing::warn!(error = %e, "speakers unavailable, replies will be silent");
                Box::new(SilentOutput::new())
            }
        }
    };

    let deps = SessionDeps {
        tokens: Arc::new(HttpTokenProvider::new(config.endpoints.token_url.clone())),
        connector: Arc::new(WsConnector::new()),
        devices: Box::new(SystemDevices),
        output,
        analyzer: Arc::new(AnalysisClient::new(config.endpoints.analysis_url.clone())),
    };

    let session = LiveSession::new(config, deps, recipe);
    let handle = session.handle();

    tokio::spawn(print_events(handle.subscribe()));
    tokio::spawn(read_commands(handle.clone()));
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = handle.send(SessionCommand::Quit).await;
            }
        });
    }

    print_help();
    if let Some(step) = handle.recipe().snapshot() {
        println!("Active recipe: {} ({} steps)", step.title, step.total_steps());
    }
    if args.connect {
        handle.send(SessionCommand::Connect).await?;
    }

    session.run().await?;
    Ok(())
}

fn print_help() {
    println!("Commands: connect | disconnect | camera on|off | timer <secs> <label> | timers");
    println!("          pause|resume|reset|delete <n|id> | next | prev | step | volume | stats | quit");
}

/// What a line typed on stdin asks for
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Session(SessionCommand),
    NextStep,
    PreviousStep,
    ShowStep,
    Volume,
    Help,
    Unknown(String),
}

fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let verb = words.next()?.to_lowercase();
    let rest: Vec<&str> = words.collect();
    let arg = rest.join(" ");

    let input = match (verb.as_str(), rest.as_slice()) {
        ("connect", _) => Input::Session(SessionCommand::Connect),
        ("disconnect", _) => Input::Session(SessionCommand::Disconnect),
        ("camera", ["on"]) => Input::Session(SessionCommand::CameraOn),
        ("camera", ["off"]) => Input::Session(SessionCommand::CameraOff),
        ("timers", _) => Input::Session(SessionCommand::ListTimers),
        ("timer", [secs, label @ ..]) => match secs.parse::<u32>().ok().and_then(NonZeroU32::new) {
            Some(duration) => Input::Session(SessionCommand::CreateTimer {
                label: label.join(" "),
                duration,
            }),
            None => Input::Unknown(line.to_string()),
        },
        ("pause", [_, ..]) => Input::Session(SessionCommand::PauseTimer(arg)),
        ("resume", [_, ..]) => Input::Session(SessionCommand::ResumeTimer(arg)),
        ("reset", [_, ..]) => Input::Session(SessionCommand::ResetTimer(arg)),
        ("delete", [_, ..]) => Input::Session(SessionCommand::DeleteTimer(arg)),
        ("stats", _) => Input::Session(SessionCommand::Stats),
        ("quit" | "exit", _) => Input::Session(SessionCommand::Quit),
        ("next", _) => Input::NextStep,
        ("prev" | "back", _) => Input::PreviousStep,
        ("step", _) => Input::ShowStep,
        ("volume", _) => Input::Volume,
        ("help" | "?", _) => Input::Help,
        _ => Input::Unknown(line.to_string()),
    };
    Some(input)
}

async fn read_commands(handle: SessionHandle) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                let _ = handle.send(SessionCommand::Quit).await;
                return;
            }
        };

        let Some(input) = parse_input(&line) else {
            continue;
        };
        match input {
            Input::Session(command) => {
                let quitting = command == SessionCommand::Quit;
                if handle.send(command).await.is_err() || quitting {
                    return;
                }
            }
            Input::NextStep => {
                handle.recipe().next_step();
                show_step(handle.recipe());
            }
            Input::PreviousStep => {
                handle.recipe().previous_step();
                show_step(handle.recipe());
            }
            Input::ShowStep => show_step(handle.recipe()),
            Input::Volume => println!("mic volume: {:.2}", handle.volume()),
            Input::Help => print_help(),
            Input::Unknown(text) => println!("unknown command: {text}"),
        }
    }
}

fn show_step(recipe: &RecipeContext) {
    match recipe.snapshot() {
        Some(ctx) => println!(
            "Step {}/{}: {}",
            ctx.current_step + 1,
            ctx.total_steps(),
            ctx.current_step_text().unwrap_or("-")
        ),
        None => println!("No active recipe."),
    }
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match event {
            SessionEvent::Log(entry) => {
                let tag = match entry.level {
                    LogLevel::Info => "info",
                    LogLevel::Warn => "warn",
                    LogLevel::Error => "error",
                };
                println!("[{tag}] {}", entry.message);
            }
            SessionEvent::StateChanged(state) => println!("state: {state}"),
            SessionEvent::Observation(entry) => println!("seen: {}", entry.text),
            SessionEvent::TimerFinished(timer) => println!("\x07>>> {} is done!", timer.label),
            SessionEvent::Timers(timers) if timers.is_empty() => println!("No timers."),
            SessionEvent::Timers(timers) => {
                for (i, timer) in timers.iter().enumerate() {
                    println!(
                        "{:>2}. {:<24} {:>6}  {:<8} {}",
                        i + 1,
                        timer.label,
                        format_remaining(timer.remaining_seconds),
                        timer.status,
                        &timer.id[..8.min(timer.id.len())]
                    );
                }
            }
            SessionEvent::TimerUpdated(timer) => println!(
                "{}: {} ({})",
                timer.label,
                timer.status,
                format_remaining(timer.remaining_seconds)
            ),
            SessionEvent::Transcript { speaker, text } => println!("{speaker:?}: {text}"),
            SessionEvent::Disconnected { can_retry: true, .. } => {
                println!("Type 'connect' to start a new session.");
            }
            SessionEvent::Stats(stats) => println!("{stats:#?}"),
            _ => {}
        }
    }
}

async fn extract(config: &Config, input: &str, json: bool) -> anyhow::Result<()> {
    let kind = ContentKind::infer(input);
    let content = match kind {
        ContentKind::Image => {
            let bytes = std::fs::read(input).with_context(|| format!("failed to read {input}"))?;
            base64::engine::general_purpose::STANDARD.encode(bytes)
        }
        ContentKind::Url | ContentKind::Text => input.to_string(),
    };

    let extractor = RecipeExtractor::new(config.endpoints.extraction_url.clone());
    let recipe = extractor.extract(&content, kind).await.map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
        return Ok(());
    }

    println!("{}", recipe.title);
    if let Some(servings) = &recipe.servings {
        println!("Serves {servings}");
    }
    println!("\nIngredients:");
    for ingredient in &recipe.ingredients {
        println!("  - {ingredient}");
    }
    println!("\nSteps:");
    for (i, step) in recipe.instructions.iter().enumerate() {
        println!("  {}. {step}", i + 1);
    }
    Ok(())
}

/// Test microphone input and save what was heard
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: &Path) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::channel(256);
    let mut capture = AudioCapture::new()?;
    capture.start(tx)?;
    println!("Delivering {SAMPLE_RATE} Hz mono frames");
    println!("---");

    let mut recorded = Vec::new();
    for second in 1..=duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut this_second = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            this_second.extend_from_slice(&frame);
        }

        let level = volume_level(&this_second);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 50.0).round() as usize;
        println!("[{second:2}s] level: {level:.2} | [{:<50}]", "#".repeat(meter_len.min(50)));
        recorded.extend(this_second);
    }

    capture.stop();

    let wav = samples_to_wav(&recorded, SAMPLE_RATE)?;
    std::fs::write(output, wav)?;

    println!("\n---");
    println!("Saved {} samples to {}", recorded.len(), output.display());
    println!("If the meter stayed near 0, check your input device and its levels.");
    Ok(())
}

/// Test speaker output with back-to-back tone chunks
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear one continuous 440Hz tone for 2 seconds\n");

    let mut scheduler = PlaybackScheduler::new(SpeakerOutput::new()?);

    // Four half-second chunks; any gap between them is audible as a click
    let chunk_len = usize::try_from(OUTPUT_SAMPLE_RATE / 2)?;
    for chunk in 0..4 {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..chunk_len)
            .map(|i| {
                let t = (chunk * chunk_len + i) as f32 / OUTPUT_SAMPLE_RATE as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
            })
            .collect();
        let unit = scheduler.schedule(&AudioBuffer::new(samples, OUTPUT_SAMPLE_RATE));
        println!("chunk {} at {:.3}s for {:.3}s", unit.id, unit.start, unit.duration);
    }

    while scheduler.is_speaking() {
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.reap();
    }

    println!("\n---");
    println!("If the tone was smooth, gapless playback works.");
    Ok(())
}
