//! goldeneyes-platform — Stand-ins for the host platform's services.
//!
//! Provides the built-in projector presets and a replay face tracker that
//! feeds recorded poses to a tracking session.

pub mod presets;
pub mod replay;

pub use presets::{list_presets, lookup_preset, PresetError, PresetFile, DEFAULT_PRESET};
pub use replay::{load_recording, parse_recording, ReplayError, ReplayTracker};
