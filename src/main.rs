use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_call::{
    create_router, AppState, AudioSource, CallEngine, CallState, Config, DefaultDevices,
    NatsTranscriptPublisher, NatsTransport, Scenario,
};

#[derive(Parser)]
#[command(name = "voice-call")]
#[command(about = "Live duplex voice conversations with a remote voice session")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, global = true, default_value = "config/voice-call")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control API
    Serve {
        /// Replay a WAV file instead of the microphone
        #[arg(long)]
        wav: Option<String>,
    },
    /// Run a single call from the terminal
    Call {
        /// Persona / instructions for the remote session
        #[arg(short, long)]
        instructions: String,

        /// Scenario title
        #[arg(short, long)]
        title: Option<String>,

        /// Replay a WAV file instead of the microphone
        #[arg(long)]
        wav: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config).with_context(|| format!("Failed to load config {}", cli.config))?;

    info!("Voice Call v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve { wav } => serve(&cfg, audio_source(wav)).await,
        Command::Call {
            instructions,
            title,
            wav,
        } => {
            let mut scenario = Scenario::new(instructions);
            scenario.title = title;
            call(&cfg, audio_source(wav), scenario).await
        }
    }
}

fn audio_source(wav: Option<String>) -> AudioSource {
    match wav {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    }
}

async fn build_engine(cfg: &Config, source: AudioSource) -> Result<CallEngine> {
    let transport = NatsTransport::connect(&cfg.transport.nats_url, cfg.transport_config()).await?;
    let handoff = NatsTranscriptPublisher::for_transport(&transport, cfg.transport.subject_prefix.clone());
    let devices = DefaultDevices::new(source, cfg.backend_config());

    Ok(CallEngine::new(
        cfg.session_config(),
        Arc::new(transport),
        Arc::new(devices),
        Arc::new(handoff),
    ))
}

async fn serve(cfg: &Config, source: AudioSource) -> Result<()> {
    let engine = build_engine(cfg, source).await?;
    let app = create_router(AppState::new(engine.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested");
        })
        .await?;

    let final_state = engine.stop().await;
    info!("Server stopped (call state: {})", final_state);

    Ok(())
}

async fn call(cfg: &Config, source: AudioSource, scenario: Scenario) -> Result<()> {
    let engine = build_engine(cfg, source).await?;
    let session_id = engine.start(scenario).await?;

    info!("Call {} is live, press Ctrl-C to hang up", session_id);

    let mut state_rx = engine.subscribe_state();
    let mut printed = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Hanging up");
                engine.stop().await;
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() || !state_rx.borrow().is_live() {
                    break;
                }
            }
            _ = ticker.tick() => {
                printed = print_new_turns(&engine, printed);
            }
        }
    }

    // A remote close is still being torn down and handed off
    loop {
        let state = *state_rx.borrow();
        if matches!(state, CallState::Results | CallState::Error | CallState::Idle) {
            break;
        }
        if state_rx.changed().await.is_err() {
            break;
        }
    }

    print_new_turns(&engine, printed);

    let snapshot = engine.snapshot();
    info!(
        "Call ended in state {} after {}s with {} turns",
        snapshot.state, snapshot.elapsed_secs, snapshot.turns
    );

    if let Some(error) = engine.last_error() {
        warn!("Call failed: {}", error);
        anyhow::bail!(error);
    }

    Ok(())
}

fn print_new_turns(engine: &CallEngine, printed: usize) -> usize {
    let transcript = engine.transcript();
    for turn in transcript.turns().iter().skip(printed) {
        println!("{}: {}", turn.channel, turn.text);
    }
    transcript.len()
}
