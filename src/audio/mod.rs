//! # Audio Module
//!
//! Sound clip storage, preloading and per-guild playback for the soundboard.
//!
//! ## Architecture
//!
//! ### [`sound`] - Data Model
//! - [`sound::Sound`]: one clip plus its preloaded Opus frames
//! - [`sound::SoundCollection`]: weighted clips sharing trigger commands,
//!   optionally chained to another collection
//!
//! ### [`preload`] - Preload Pipeline
//! - ffmpeg decodes each file to 48 kHz stereo PCM
//! - libopus encodes 20 ms frames through a bounded handoff buffer
//! - Runs once at startup, before any command is accepted
//!
//! ### [`scheduler`] - Playback Scheduler
//! - One bounded queue and one driver task per active guild
//! - Strict FIFO within a guild, chained plays back-to-back
//! - Overflow plays are dropped (rate limiting)
//!
//! ### [`transport`] - Voice Transport
//! - Join / move / leave voice channels through songbird
//! - Transmits preloaded frames without re-encoding
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers
//! - **Channels**: Stereo (2 channels)
//! - **Frames**: 960 samples per channel (20 ms)
//! - **Encoding**: Opus at 128kbps (configurable)

pub mod preload;
pub mod scheduler;
pub mod sound;
pub mod transport;

use std::time::Duration;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;

/// Samples per channel in one frame (20 ms at 48 kHz).
pub const FRAME_SAMPLES: usize = 960;

pub const FRAME_DURATION: Duration = Duration::from_millis(20);
