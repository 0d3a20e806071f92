use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::looper::{Loop, LoopStore};
use crate::session::Session;

/// Bytes before the samples in an encoded loop: length, start offset, content flag.
const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub play: bool,
    pub monitor: bool,
    pub base_loop_length: usize,
    pub track_count: usize,
    pub tracks: Vec<TrackState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackState {
    pub track_id: u32,
    pub volume: f32,
    pub muted: bool,
    pub soloed: bool,
    pub loop_store: LoopStoreState,
}

impl Default for TrackState {
    fn default() -> Self {
        TrackState {
            track_id: 0,
            volume: 0.7,
            muted: false,
            soloed: false,
            loop_store: LoopStoreState::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopStoreState {
    pub loop_count: usize,
    pub base_loop_length: usize,
    /// One base64 blob per loop, oldest first.
    pub loops: Vec<String>,
}

/// Packs a loop as `length: u32 LE`, `start_offset: u32 LE`,
/// `has_content: u8`, then the samples channel after channel.
pub fn encode_loop(current: &Loop) -> String {
    let length = current.length();
    let write_samples = current.has_content() && length > 0;
    let sample_bytes = if write_samples {
        length * current.channels() * 4
    } else {
        0
    };
    let mut bytes = Vec::with_capacity(HEADER_LEN + sample_bytes);
    bytes.extend_from_slice(&(length as u32).to_le_bytes());
    bytes.extend_from_slice(&(current.start_offset() as u32).to_le_bytes());
    bytes.push(current.has_content() as u8);
    if write_samples {
        for channel in 0..current.channels() {
            for sample in current.samples(channel) {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
    STANDARD.encode(bytes)
}

/// Unpacks a loop into a fresh buffer of `capacity` samples per channel.
///
/// A blob too short for its own header or samples comes back as an empty
/// loop. Samples past `capacity` are dropped.
pub fn decode_loop(blob: &str, channels: usize, capacity: usize) -> Result<Loop> {
    let mut restored = Loop::try_new(channels, capacity)?;
    let bytes = match STANDARD.decode(blob) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("dropping undecodable loop blob: {e}");
            return Ok(restored);
        }
    };
    if bytes.len() < HEADER_LEN {
        log::warn!("dropping truncated loop blob ({} bytes)", bytes.len());
        return Ok(restored);
    }

    let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let start_offset = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let has_content = bytes[8] != 0;
    if !has_content || length == 0 {
        restored.set_metadata(0, start_offset, false);
        return Ok(restored);
    }

    let samples = &bytes[HEADER_LEN..];
    if samples.len() / 4 / length < channels {
        log::warn!(
            "dropping truncated loop blob: {} sample bytes for {channels} x {length} samples",
            samples.len()
        );
        return Ok(restored);
    }

    let kept = length.min(capacity);
    if kept < length {
        log::warn!("loop of {length} samples clamped to {capacity}");
    }
    for channel in 0..channels {
        let stored = &samples[channel * length * 4..];
        let target = restored.channel_mut(channel);
        for (sample, chunk) in target[..kept].iter_mut().zip(stored.chunks_exact(4)) {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
    restored.set_metadata(kept, start_offset, true);
    Ok(restored)
}

impl LoopStore {
    pub fn to_state(&self) -> LoopStoreState {
        LoopStoreState {
            loop_count: self.loop_count(),
            base_loop_length: self.base_length(),
            loops: self.loops().iter().map(encode_loop).collect(),
        }
    }

    /// Replaces every loop with the saved ones. Playback state is untouched.
    pub fn restore_state(&mut self, state: &LoopStoreState) -> Result<()> {
        let mut loops = Vec::with_capacity(state.loops.len());
        for blob in &state.loops {
            loops.push(decode_loop(blob, self.channels(), self.capacity())?);
        }
        if loops.len() != state.loop_count {
            log::warn!(
                "loop store claims {} loops but holds {}",
                state.loop_count,
                loops.len()
            );
        }
        self.restore(loops, state.base_loop_length);
        Ok(())
    }
}

impl Session {
    pub fn to_state(&self) -> SessionState {
        let controls = self.controls();
        SessionState {
            play: controls.is_play(),
            monitor: controls.is_monitor(),
            base_loop_length: self.timeline().base_length(),
            track_count: self.tracks().len(),
            tracks: self
                .tracks()
                .iter()
                .map(|track| TrackState {
                    track_id: track.id(),
                    volume: track.volume(),
                    muted: track.is_muted(),
                    soloed: track.is_soloed(),
                    loop_store: track.looper().to_state(),
                })
                .collect(),
        }
    }

    /// Replaces every track with the saved ones.
    ///
    /// Must run before the session is handed to the audio thread: it
    /// allocates every restored loop.
    pub fn restore_state(&mut self, state: &SessionState) -> Result<()> {
        self.remove_all_tracks(drop);
        for saved in &state.tracks {
            let track = self.restore_track(saved.track_id)?;
            track.set_volume(saved.volume);
            track.set_muted(saved.muted);
            track.set_soloed(saved.soloed);
            track.looper_mut().restore_state(&saved.loop_store)?;
            track.publish();
        }

        let base = if state.base_loop_length > 0 {
            state.base_loop_length
        } else {
            self.tracks()
                .iter()
                .map(|track| track.looper().base_length())
                .find(|base| *base > 0)
                .unwrap_or(0)
        };
        self.timeline().set_base_length(base);
        self.set_transport_state(state.play, state.monitor);
        log::info!(
            "restored {} track(s), base length {base}",
            self.tracks().len()
        );
        Ok(())
    }
}

pub fn save(path: &Path, state: &SessionState) -> Result<()> {
    let text = serde_json::to_string_pretty(state)?;
    std::fs::write(path, text).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("saved {} track(s) to {}", state.tracks.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<SessionState> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let state: SessionState = serde_json::from_str(&text)?;
    log::info!("loaded {} track(s) from {}", state.tracks.len(), path.display());
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn recorded_store() -> LoopStore {
        let mut store = LoopStore::new(2, 100, 0).unwrap();
        store.start_playback();
        store.start_recording();
        let left: Vec<f32> = (0..20).map(|i| (i as f32 * 0.37).sin()).collect();
        let right: Vec<f32> = (0..20).map(|i| -1.0 / (i as f32 + 3.0)).collect();
        store.record(&[&left, &right]);
        store.advance(20);
        store.stop_recording();
        store.advance(7);
        store.replenish().unwrap();
        store.start_recording();
        store.record(&[&[f32::MIN_POSITIVE, 1e-30, 0.5], &[f32::MAX, -0.0, 2.0]]);
        store.stop_recording();
        store
    }

    #[test]
    fn test_store_round_trip_is_bit_exact() {
        let store = recorded_store();
        let state = store.to_state();
        assert_eq!(state.loop_count, 2);
        assert_eq!(state.base_loop_length, 20);

        let mut restored = LoopStore::new(2, 100, 0).unwrap();
        restored.restore_state(&state).unwrap();
        assert_eq!(restored.base_length(), 20);
        assert_eq!(restored.loop_count(), 2);
        for (a, b) in store.loops().iter().zip(restored.loops()) {
            assert_eq!(a.length(), b.length());
            assert_eq!(a.start_offset(), b.start_offset());
            assert_eq!(a.has_content(), b.has_content());
            for channel in 0..2 {
                let bits_a: Vec<u32> = a.samples(channel).iter().map(|s| s.to_bits()).collect();
                let bits_b: Vec<u32> = b.samples(channel).iter().map(|s| s.to_bits()).collect();
                assert_eq!(bits_a, bits_b);
            }
        }
        assert_eq!(restored.loops()[1].start_offset(), 7);
        // the overdub was padded to the base length before saving
        assert_eq!(restored.loops()[1].length(), 20);
    }

    #[test]
    fn test_empty_loop_has_no_samples() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.start_recording();
        store.stop_recording();
        let blob = STANDARD.decode(encode_loop(&store.loops()[0])).unwrap();
        assert_eq!(blob, vec![0; HEADER_LEN]);
    }

    #[test]
    fn test_truncated_blob_restores_empty() {
        let store = recorded_store();
        let full = STANDARD.decode(encode_loop(&store.loops()[0])).unwrap();

        for cut in [0, 4, HEADER_LEN, full.len() - 1] {
            let blob = STANDARD.encode(&full[..cut]);
            let restored = decode_loop(&blob, 2, 100).unwrap();
            assert_eq!(restored.length(), 0);
            assert!(!restored.has_content());
        }
        let restored = decode_loop("not base64!", 2, 100).unwrap();
        assert!(!restored.has_content());
    }

    #[test]
    fn test_mono_blob_into_stereo_store_is_truncated() {
        let mut mono = LoopStore::new(1, 100, 0).unwrap();
        mono.start_recording();
        mono.record(&[&[0.5; 10]]);
        mono.stop_recording();
        let restored = decode_loop(&encode_loop(&mono.loops()[0]), 2, 100).unwrap();
        assert!(!restored.has_content());

        // the other way round keeps the first channel
        let store = recorded_store();
        let restored = decode_loop(&encode_loop(&store.loops()[0]), 1, 100).unwrap();
        assert_eq!(restored.samples(0), store.loops()[0].samples(0));
    }

    #[test]
    fn test_oversized_blob_is_clamped() {
        let store = recorded_store();
        let restored = decode_loop(&encode_loop(&store.loops()[0]), 2, 8).unwrap();
        assert_eq!(restored.length(), 8);
        assert!(restored.has_content());
        assert_eq!(restored.samples(0), &store.loops()[0].samples(0)[..8]);
        // the second channel is read at the stored stride
        assert_eq!(restored.samples(1), &store.loops()[0].samples(1)[..8]);
    }

    fn session() -> Session {
        let config = Config {
            channels: 1,
            max_loop_seconds: 1.0,
            crossfade_ms: 0.0,
            ..Config::default()
        };
        Session::new(config, 1000).unwrap()
    }

    fn run(session: &mut Session, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; input.len()];
        session.process(&[input], &mut [&mut out[..]]);
        out
    }

    #[test]
    fn test_session_save_and_load() {
        let mut session = session();
        let a = session.add_track().unwrap();
        let b = session.add_track().unwrap();
        let c = session.add_track().unwrap();
        session.remove_track(b.id());
        a.set_volume(1.0);
        c.set_volume(0.5);
        c.set_muted(true);

        session.start_recording_track(a.id()).unwrap();
        run(&mut session, &[0.25; 16]);
        session.stop_recording_track(a.id()).unwrap();
        session.controls().set_monitor(true);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save(&path, &session.to_state()).unwrap();
        let state = load(&path).unwrap();
        assert_eq!(state, session.to_state());
        assert_eq!(state.track_count, 2);

        let mut restored = self::session();
        restored.restore_state(&state).unwrap();
        assert_eq!(restored.timeline().base_length(), 16);
        let ids: Vec<u32> = restored.tracks().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![a.id(), c.id()]);
        let track_c = restored.track(c.id()).unwrap();
        assert!(track_c.is_muted());
        assert_eq!(track_c.volume(), 0.5);
        assert!(restored.controls().is_monitor());
        assert_eq!(restored.add_track().unwrap().id(), c.id() + 1);

        // the transport picks up where it was on the first block
        restored.controls().set_monitor(false);
        let out = run(&mut restored, &[0.0; 16]);
        assert!(restored.is_playing());
        assert_eq!(out, vec![0.25; 16]);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let state: SessionState =
            serde_json::from_str(r#"{ "play": true, "tracks": [ { "trackId": 3 } ] }"#).unwrap();
        assert!(state.play);
        assert_eq!(state.tracks[0].track_id, 3);
        assert_eq!(state.tracks[0].volume, 0.7);
        assert!(state.tracks[0].loop_store.loops.is_empty());
    }

    #[test]
    fn test_duplicate_track_ids_are_rejected() {
        let state = SessionState {
            tracks: vec![TrackState::default(), TrackState::default()],
            ..SessionState::default()
        };
        let mut session = session();
        assert!(matches!(
            session.restore_state(&state),
            Err(Error::DuplicateTrack(0))
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("nope.json")),
            Err(Error::Io { .. })
        ));
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load(&path), Err(Error::State(_))));
    }
}
