use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on channels per block, so the audio callback can gather its
/// port slices into fixed-size arrays.
pub const MAX_CHANNELS: usize = 2;

/// Longest loop a track may hold, in seconds.
pub const MAX_LOOP_SECONDS: f64 = 600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of audio channels recorded and played back (1 or 2).
    pub channels: usize,
    /// Capacity of every loop buffer, in seconds.
    pub max_loop_seconds: f64,
    /// Length of the loop boundary crossfade, in milliseconds.
    pub crossfade_ms: f64,
    /// Volume given to freshly created tracks.
    pub default_volume: f32,
    /// Slots in the control -> audio command queue.
    pub command_capacity: usize,
    /// Name the JACK client registers under.
    pub client_name: String,
    /// Connect to the first physical capture/playback ports on startup.
    pub auto_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            channels: 2,
            max_loop_seconds: 60.0,
            crossfade_ms: 10.0,
            default_volume: 0.7,
            command_capacity: 64,
            client_name: "multiloop".to_string(),
            auto_connect: true,
        }
    }
}

impl Config {
    /// Reads a TOML config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(Error::Config(format!(
                "channels must be between 1 and {MAX_CHANNELS}, got {}",
                self.channels
            )));
        }
        if !(self.max_loop_seconds > 0.0 && self.max_loop_seconds <= MAX_LOOP_SECONDS) {
            return Err(Error::Config(format!(
                "max_loop_seconds must be in (0, {MAX_LOOP_SECONDS}], got {}",
                self.max_loop_seconds
            )));
        }
        if !(0.0..=1000.0).contains(&self.crossfade_ms) {
            return Err(Error::Config(format!(
                "crossfade_ms must be in [0, 1000], got {}",
                self.crossfade_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(Error::Config(format!(
                "default_volume must be in [0, 1], got {}",
                self.default_volume
            )));
        }
        if self.command_capacity == 0 {
            return Err(Error::Config("command_capacity must be nonzero".into()));
        }
        Ok(())
    }

    /// Number of samples per channel a loop buffer holds at `sample_rate`.
    pub fn loop_capacity(&self, sample_rate: u32) -> Result<usize> {
        let samples = self.max_loop_seconds * sample_rate as f64;
        if !samples.is_finite() || samples < 1.0 || samples > u32::MAX as f64 {
            return Err(Error::Capacity(format!(
                "{} s at {sample_rate} Hz is not a usable loop capacity",
                self.max_loop_seconds
            )));
        }
        Ok(samples as usize)
    }

    /// Number of samples the loop boundary crossfade spans at `sample_rate`.
    pub fn fade_samples(&self, sample_rate: u32) -> usize {
        (sample_rate as f64 * self.crossfade_ms / 1000.0) as usize
    }
}
