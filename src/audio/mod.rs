//! # Audio Module
//!
//! Per-guild queue persistence and playback control.
//!
//! ### [`queue`] - Persistent queues
//! - One document per guild with its queue, loop flag and notification channel
//! - Per-guild volume and the restart-resume records
//!
//! ### [`player`] - Playback controllers
//! - One [`player::PlaybackController`] per guild, driving the head of the queue
//! - Skip, pause with resume point, hold/resume, loop and volume
//!
//! ### [`restart`] - Restart-safe resume
//! - Saves exact offsets on shutdown and rejoins voice channels on startup
//!
//! ### [`transport`] - Platform seams
//! - Voice output and notification traits implemented by the bot layer

pub mod player;
pub mod queue;
pub mod restart;
pub mod transport;

#[cfg(test)]
pub mod testing;
