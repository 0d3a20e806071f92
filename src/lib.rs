//! A multi-track audio looper.
//!
//! Every track records loops that wrap at one shared base length, set by the
//! first loop ever finished. Overdubs remember the phase they were recorded
//! at and play back there.

pub mod audio;
pub mod commands;
pub mod config;
pub mod error;
pub mod looper;
pub mod persist;
pub mod request;
pub mod session;
pub mod timeline;
pub mod track;
pub mod wav;

pub use config::Config;
pub use error::{Error, Result};
pub use looper::{Loop, LoopStore};
pub use session::{Controls, Session, TrackFactory};
pub use timeline::TimelineCoordinator;
pub use track::{Track, TrackHandle};
