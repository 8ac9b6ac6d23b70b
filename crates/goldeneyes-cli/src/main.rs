use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use goldeneyes_core::session::PoseSink;
use goldeneyes_core::{
    FaceAnchorProjector, LostFacePolicy, SceneTree, SessionHandle, TrackingConfig, TrackingEvent,
    TrackingSession, TrackingUpdate,
};
use goldeneyes_platform::{PresetFile, ReplayTracker, DEFAULT_PRESET};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use zbus::proxy;

#[derive(Parser)]
#[command(name = "goldeneyes", about = "GoldenEyes face-anchored eye marker tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a face tracking recording and print marker transforms per frame
    Replay {
        /// JSON-lines recording
        file: PathBuf,
        /// Built-in preset name
        #[arg(short, long, default_value = DEFAULT_PRESET)]
        preset: String,
        /// Preset TOML file (overrides --preset)
        #[arg(long)]
        preset_file: Option<PathBuf>,
        /// What to do with markers when the face is lost (freeze, hide)
        #[arg(long)]
        lost_face: Option<LostFacePolicy>,
        /// Delay between frames in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// List built-in presets
    Presets,
    /// Enable tracking in the running daemon
    Enable,
    /// Disable tracking in the running daemon
    Disable,
    /// Show the daemon's current marker transforms
    Transforms,
    /// Show daemon status
    Status,
}

#[proxy(
    interface = "org.goldeneyes.Projector1",
    default_service = "org.goldeneyes.Projector1",
    default_path = "/org/goldeneyes/Projector1"
)]
trait Projector {
    async fn set_tracking_enabled(&self, enabled: bool) -> zbus::Result<bool>;
    async fn current_marker_transforms(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

enum ReplayMessage {
    Event(TrackingEvent),
    Finished(SessionHandle),
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<ReplayMessage>,
}

impl PoseSink for ChannelSink {
    fn deliver(&self, event: TrackingEvent) -> bool {
        self.tx.send(ReplayMessage::Event(event)).is_ok()
    }

    fn finished(&self, session: SessionHandle) {
        let _ = self.tx.send(ReplayMessage::Finished(session));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            file,
            preset,
            preset_file,
            lost_face,
            interval_ms,
        } => {
            let preset = match preset_file {
                Some(path) => PresetFile::load(&path)?,
                None => goldeneyes_platform::lookup_preset(&preset)?.clone(),
            };
            let mut config = preset.projector;
            if let Some(policy) = lost_face {
                config.lost_face = policy;
            }
            replay(file, config, Duration::from_millis(interval_ms)).await?;
        }
        Commands::Presets => {
            for preset in goldeneyes_platform::list_presets() {
                let projector = &preset.projector;
                println!(
                    "{:<16} {:<16} base={} factor={} lost_face={:?}",
                    preset.preset.name,
                    projector.placement.name(),
                    projector.base_scale,
                    projector.scale_factor,
                    projector.lost_face,
                );
                if !preset.preset.description.is_empty() {
                    println!("    {}", preset.preset.description);
                }
            }
        }
        Commands::Enable => {
            let active = daemon().await?.set_tracking_enabled(true).await?;
            println!("tracking: {}", if active { "on" } else { "off" });
        }
        Commands::Disable => {
            let active = daemon().await?.set_tracking_enabled(false).await?;
            println!("tracking: {}", if active { "on" } else { "off" });
        }
        Commands::Transforms => {
            let json = daemon().await?.current_marker_transforms().await?;
            print_json(&json)?;
        }
        Commands::Status => match daemon().await {
            Ok(proxy) => print_json(&proxy.status().await?)?,
            Err(e) => {
                tracing::debug!(error = %e, "daemon connection failed");
                println!("goldeneyesd: not connected");
            }
        },
    }

    Ok(())
}

async fn daemon() -> Result<ProjectorProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = ProjectorProxy::new(&conn).await?;
    Ok(proxy)
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Run a tracking session over a recording and print one JSON line per event.
async fn replay(
    file: PathBuf,
    config: goldeneyes_core::ProjectorConfig,
    interval: Duration,
) -> Result<()> {
    let projector = FaceAnchorProjector::new(config)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn PoseSink> = Arc::new(ChannelSink { tx });

    let tracker = ReplayTracker::new(file, interval);
    let mut session = TrackingSession::new(
        tracker,
        SceneTree::new(),
        projector,
        sink,
        TrackingConfig::default(),
    );
    session.set_tracking_enabled(true)?;
    let Some(handle) = session.handle() else {
        bail!("tracking did not start");
    };

    let mut frame = 0usize;
    while let Some(message) = rx.recv().await {
        match message {
            ReplayMessage::Event(event) => {
                let kind = match &event.update {
                    TrackingUpdate::Pose { .. } => "pose",
                    TrackingUpdate::FaceLost => "face_lost",
                };
                session.handle_event(event)?;
                println!(
                    "{}",
                    serde_json::json!({
                        "frame": frame,
                        "event": kind,
                        "markers": session.current_marker_transforms(),
                    })
                );
                frame += 1;
            }
            ReplayMessage::Finished(finished) if finished == handle => break,
            ReplayMessage::Finished(_) => {}
        }
    }

    session.set_tracking_enabled(false)?;
    tracing::info!(frames = frame, "replay complete");
    Ok(())
}
