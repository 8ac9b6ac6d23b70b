use crate::engine::{EngineError, EngineHandle};
use goldeneyes_core::session::{SessionError, TrackingError};
use zbus::interface;

pub const BUS_NAME: &str = "org.goldeneyes.Projector1";
pub const OBJECT_PATH: &str = "/org/goldeneyes/Projector1";

/// D-Bus interface for the GoldenEyes projector daemon.
///
/// Bus name: org.goldeneyes.Projector1
/// Object path: /org/goldeneyes/Projector1
pub struct ProjectorService {
    engine: EngineHandle,
    preset: String,
}

impl ProjectorService {
    pub fn new(engine: EngineHandle, preset: String) -> Self {
        Self { engine, preset }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Session(SessionError::Tracking(e @ TrackingError::Unavailable(_))) => {
            zbus::fdo::Error::NotSupported(e.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.goldeneyes.Projector1")]
impl ProjectorService {
    /// Turn face tracking on or off. Returns whether tracking is active.
    async fn set_tracking_enabled(&self, enabled: bool) -> zbus::fdo::Result<bool> {
        tracing::info!(enabled, "set_tracking_enabled requested");
        self.engine.set_tracking_enabled(enabled).await.map_err(to_fdo)
    }

    /// Current marker transforms as JSON: `null` while idle, otherwise a
    /// two-element array (left, right).
    async fn current_marker_transforms(&self) -> zbus::fdo::Result<String> {
        let transforms = self
            .engine
            .current_marker_transforms()
            .await
            .map_err(to_fdo)?;
        serde_json::to_string(&transforms).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let session = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "preset": self.preset,
            "session": session,
        })
        .to_string())
    }
}
