//! Tiered media cache and player control for a terminal music player.
//!
//! Searches, resolved stream URLs, thumbnails and full audio files are kept
//! in durable keyed stores with TTL and LRU bounds ([`cache`]). Playback runs
//! through an external mpv process driven over a JSON control socket
//! ([`audio`]), while the full track downloads in the background so the next
//! play is served from disk.

pub mod audio;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
