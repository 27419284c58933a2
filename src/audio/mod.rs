//! # Audio Module
//!
//! Playback through an external player process (mpv).
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Coordinator
//! - One active session at a time; a new `play` stops the old one first
//! - Resolution order: cached audio file, cached stream URL, lookup service
//! - Stale resolutions are dropped by generation number
//!
//! ### [`process`] - Player Processes
//! - Spawns mpv with a per-session control socket
//! - Graceful stop: `quit`, grace period, then kill
//!
//! ### [`control`] - Control Channel
//! - Line-delimited JSON commands (pause, seek, volume, quit)
//! - Bounded waits, failures are logged and reported, never raised
//!
//! ### [`download`] - Background Downloads
//! - At most one download per item, keyed in-flight registry
//! - Finished files move into the audio cache so repeat plays are local

pub mod control;
pub mod download;
pub mod process;
pub mod session;

pub use control::{ControlChannel, Delivery, TransportCommand};
pub use download::{DownloadHandle, DownloadManager, DownloadStart};
pub use process::{ExitInfo, MpvBackend, PlaybackSource, PlayerBackend, PlayerProcess};
pub use session::{
    CommandOutcome, PlaybackCoordinator, PlaybackEvent, SessionSettings, SessionState, Started,
};
