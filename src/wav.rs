use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::Result;
use crate::track::Track;

/// Writes one base cycle of `track` as a 32-bit float WAV, overdubs mixed in
/// at their recorded phase. Volume, mute and solo are not applied.
///
/// Returns `false` without touching the file when the track has nothing to
/// export yet.
pub fn export_track_cycle(track: &Track, sample_rate: u32, path: &Path) -> Result<bool> {
    let looper = track.looper();
    if looper.base_length() == 0 || !looper.has_content() {
        return Ok(false);
    }
    let cycle = looper.render_cycle();

    let spec = WavSpec {
        channels: cycle.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for frame in 0..looper.base_length() {
        for channel in &cycle {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;
    log::info!(
        "exported {} ({} samples) to {}",
        track.name(),
        looper.base_length(),
        path.display()
    );
    Ok(true)
}
