use std::sync::Arc;

use crate::error::{Error, Result};
use crate::request::RequestSlot;

/// Loops a store can hold. Recording refuses to start once the list is full,
/// so pushing a loop never reallocates.
pub const LOOP_LIST_CAPACITY: usize = 32;

/// One recorded (or in-progress) loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// One buffer per channel, each `capacity` samples long.
    buffer: Vec<Vec<f32>>,
    /// Samples actually recorded.
    length: usize,
    /// Phase within the base cycle where this loop's first sample plays.
    start_offset: usize,
    /// Whether recording finished with at least one sample.
    has_content: bool,
}

impl Loop {
    /// Allocates a silent loop, reporting allocation failure instead of aborting.
    pub fn try_new(channels: usize, capacity: usize) -> Result<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(channels)
            .map_err(|e| Error::Capacity(e.to_string()))?;
        for _ in 0..channels {
            let mut channel = Vec::new();
            channel
                .try_reserve_exact(capacity)
                .map_err(|e| Error::Capacity(format!("{capacity} samples: {e}")))?;
            channel.resize(capacity, 0.0);
            buffer.push(channel);
        }
        Ok(Loop {
            buffer,
            length: 0,
            start_offset: 0,
            has_content: false,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn capacity(&self) -> usize {
        self.buffer.first().map_or(0, Vec::len)
    }

    pub fn channels(&self) -> usize {
        self.buffer.len()
    }

    /// The recorded part of one channel.
    pub fn samples(&self, channel: usize) -> &[f32] {
        &self.buffer[channel][..self.length]
    }

    pub(crate) fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        &mut self.buffer[channel]
    }

    pub(crate) fn set_metadata(&mut self, length: usize, start_offset: usize, has_content: bool) {
        self.length = length.min(self.capacity());
        self.start_offset = start_offset;
        self.has_content = has_content && self.length > 0;
    }

    /// Silences the written part of the buffer and forgets the metadata.
    fn reset(&mut self) {
        for channel in &mut self.buffer {
            channel[..self.length].fill(0.0);
        }
        self.length = 0;
        self.start_offset = 0;
        self.has_content = false;
    }

    /// Blends the first `fade_samples` of the loop into its last
    /// `fade_samples`, so the wrap from the end back to the start is smooth.
    fn apply_crossfade(&mut self, fade_samples: usize) {
        let fade = fade_samples.min(self.length);
        if fade == 0 {
            return;
        }
        let length = self.length;
        for channel in &mut self.buffer {
            for i in 0..fade {
                let alpha = i as f32 / fade as f32;
                let end = length - fade + i;
                channel[end] = channel[end] * (1.0 - alpha) + channel[i] * alpha;
            }
        }
    }
}

/// Deferred clear/undo requests for one store, shared with the control thread.
#[derive(Debug, Default)]
pub struct LoopRequests {
    pub clear_all: RequestSlot,
    pub undo_last: RequestSlot,
}

/// All loops of one track, plus the cursors used to record and play them.
///
/// Everything here runs on the audio thread. The only piece shared with
/// other threads is [`LoopRequests`].
#[derive(Debug)]
pub struct LoopStore {
    loops: Vec<Loop>,
    /// Pre-allocated buffers handed to the next recordings. Undone loops
    /// land here too, so nothing is freed on the audio thread.
    spares: Vec<Loop>,
    /// Length every loop wraps at, 0 until the first loop is finalized.
    base_length: usize,
    recording_index: Option<usize>,
    write_cursor: usize,
    read_cursor: usize,
    playing: bool,
    /// Raised when recording reached its cap; consumed by the owner.
    stop_request: bool,
    channels: usize,
    capacity: usize,
    fade_samples: usize,
    requests: Arc<LoopRequests>,
}

impl LoopStore {
    /// Creates a store whose loops hold `capacity` samples per channel.
    pub fn new(channels: usize, capacity: usize, fade_samples: usize) -> Result<Self> {
        let mut store = LoopStore {
            loops: Vec::with_capacity(LOOP_LIST_CAPACITY),
            spares: Vec::new(),
            base_length: 0,
            recording_index: None,
            write_cursor: 0,
            read_cursor: 0,
            playing: false,
            stop_request: false,
            channels,
            capacity,
            fade_samples,
            requests: Arc::new(LoopRequests::default()),
        };
        store.prepare(capacity, fade_samples)?;
        Ok(store)
    }

    /// Drops every loop and re-sizes the spare buffers, keeping one.
    pub fn prepare(&mut self, capacity: usize, fade_samples: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::Capacity("loop capacity must be nonzero".into()));
        }
        self.capacity = capacity;
        self.fade_samples = fade_samples;
        self.loops.clear();
        self.spares.clear();
        self.spares.reserve(LOOP_LIST_CAPACITY + 1);
        self.spares.push(Loop::try_new(self.channels, capacity)?);
        self.base_length = 0;
        self.recording_index = None;
        self.write_cursor = 0;
        self.read_cursor = 0;
        self.playing = false;
        self.stop_request = false;
        Ok(())
    }

    /// Starts a new loop in a spare buffer. Never allocates: without a
    /// spare, or with a full loop list, the recording is refused.
    ///
    /// Returns whether the store is recording afterwards.
    pub fn start_recording(&mut self) -> bool {
        if self.recording_index.is_some() {
            return true;
        }
        if !self.can_start_recording() {
            return false;
        }
        let Some(mut new_loop) = self.spares.pop() else {
            return false;
        };
        new_loop.start_offset = if self.base_length > 0 {
            self.read_cursor % self.base_length
        } else {
            0
        };
        self.loops.push(new_loop);
        self.recording_index = Some(self.loops.len() - 1);
        self.write_cursor = 0;
        self.stop_request = false;
        true
    }

    /// Finalizes the current loop. Overdubs are padded to the base length,
    /// the buffer past the write cursor being silent already.
    pub fn stop_recording(&mut self) {
        if let Some(index) = self.recording_index.take() {
            let recorded = self.write_cursor;
            if recorded > 0 {
                let fade_samples = self.fade_samples;
                if self.base_length == 0 {
                    self.base_length = recorded;
                }
                let current = &mut self.loops[index];
                current.has_content = true;
                current.length = self.base_length.min(self.capacity).max(recorded);
                current.apply_crossfade(fade_samples);
            }
        }
        self.stop_request = false;
    }

    /// The most samples the current recording may take.
    pub fn record_cap(&self) -> usize {
        if self.base_length > 0 {
            self.base_length.min(self.capacity)
        } else {
            self.capacity
        }
    }

    /// Appends one block of input to the loop being recorded.
    ///
    /// Never writes past [`record_cap`](Self::record_cap). Hitting the cap
    /// raises a stop request instead of stopping, so the owner can update
    /// its own state on the next block.
    pub fn record(&mut self, input: &[&[f32]]) {
        let Some(index) = self.recording_index else {
            return;
        };
        let frames = input.iter().map(|channel| channel.len()).min().unwrap_or(0);
        let cap = self.record_cap();
        let to_record = frames.min(cap.saturating_sub(self.write_cursor));

        if to_record > 0 {
            let start = self.write_cursor;
            let current = &mut self.loops[index];
            for (channel, source) in input.iter().enumerate().take(self.channels) {
                current.buffer[channel][start..start + to_record]
                    .copy_from_slice(&source[..to_record]);
            }
            self.write_cursor += to_record;
            current.length = self.write_cursor;
        }

        if self.write_cursor >= cap {
            self.stop_request = true;
        }
    }

    /// Adds every finished loop into `output`, scaled by `volume`.
    ///
    /// Overdubs are realigned through their start offset, so a loop recorded
    /// half-way through the cycle plays back half-way through the cycle.
    pub fn mix(&mut self, output: &mut [&mut [f32]], volume: f32) {
        if !self.playing || self.loops.is_empty() {
            return;
        }
        let frames = output.iter().map(|channel| channel.len()).min().unwrap_or(0);
        let channels = self.channels.min(output.len());
        let base = self.base_length;

        for frame in 0..frames {
            if base > 0 && self.read_cursor >= base {
                self.read_cursor = 0;
            }

            if base > 0 {
                for (channel, out) in output.iter_mut().enumerate().take(channels) {
                    let mut mixed = 0.0;
                    for current in &self.loops {
                        if !current.has_content {
                            continue;
                        }
                        let effective =
                            (self.read_cursor + base - current.start_offset % base) % base;
                        if effective < current.length {
                            mixed += current.buffer[channel][effective];
                        }
                    }
                    out[frame] += mixed * volume;
                }
            }

            self.read_cursor += 1;
        }
    }

    /// Moves the read cursor exactly as `mix` would, without any output.
    pub fn advance(&mut self, frames: usize) {
        if !self.playing || frames == 0 {
            return;
        }
        let base = self.base_length;
        if base == 0 {
            self.read_cursor += frames;
            return;
        }
        let start = if self.read_cursor >= base {
            0
        } else {
            self.read_cursor
        };
        self.read_cursor = (start + frames - 1) % base + 1;
    }

    /// One full base cycle of every finished loop, phase-aligned, one
    /// vector per channel. Empty while no base length exists.
    pub fn render_cycle(&self) -> Vec<Vec<f32>> {
        let base = self.base_length;
        let mut cycle = vec![vec![0.0; base]; self.channels];
        if base == 0 {
            return cycle;
        }
        for current in self.loops.iter().filter(|l| l.has_content) {
            let offset = current.start_offset % base;
            for (channel, out) in cycle.iter_mut().enumerate() {
                for (phase, sample) in out.iter_mut().enumerate() {
                    let effective = (phase + base - offset) % base;
                    if effective < current.length {
                        *sample += current.buffer[channel][effective];
                    }
                }
            }
        }
        cycle
    }

    /// Joins an existing cycle of `base_length` samples at phase `cursor`.
    /// Ignored once this store has a base length of its own.
    pub fn adopt_timeline(&mut self, base_length: usize, cursor: usize) {
        if self.base_length > 0 || base_length == 0 {
            return;
        }
        self.base_length = base_length;
        if self.playing {
            self.read_cursor = cursor % base_length;
        }
    }

    pub fn start_playback(&mut self) {
        self.start_playback_at(0);
    }

    /// Starts playing from `cursor`, used to join a transport that is
    /// already running.
    pub fn start_playback_at(&mut self, cursor: usize) {
        self.playing = true;
        self.read_cursor = cursor;
    }

    pub fn stop_playback(&mut self) {
        self.playing = false;
    }

    /// Pops the newest loop, cancelling its recording if it was in progress.
    pub fn remove_last_loop(&mut self) {
        let Some(removed) = self.loops.pop() else {
            return;
        };
        if self.recording_index == Some(self.loops.len()) {
            self.recording_index = None;
            self.write_cursor = 0;
            self.stop_request = false;
        }
        self.recycle(removed);
        if self.loops.is_empty() {
            self.base_length = 0;
        }
    }

    pub fn clear_all(&mut self) {
        while let Some(removed) = self.loops.pop() {
            self.recycle(removed);
        }
        self.base_length = 0;
        self.recording_index = None;
        self.write_cursor = 0;
        self.read_cursor = 0;
        self.stop_request = false;
    }

    fn recycle(&mut self, mut removed: Loop) {
        if removed.capacity() == self.capacity && self.spares.len() < self.spares.capacity() {
            removed.reset();
            self.spares.push(removed);
        }
    }

    /// Hands the store a buffer allocated elsewhere. It comes back if the
    /// store still has a spare or the buffer does not fit.
    pub fn provide_spare(&mut self, spare: Loop) -> std::result::Result<(), Loop> {
        if !self.spares.is_empty()
            || spare.capacity() != self.capacity
            || spare.channels() != self.channels
        {
            return Err(spare);
        }
        self.spares.push(spare);
        Ok(())
    }

    /// Allocates a spare if none is left. Not for the audio thread.
    pub fn replenish(&mut self) -> Result<()> {
        if self.spares.is_empty() {
            self.spares.push(Loop::try_new(self.channels, self.capacity)?);
        }
        Ok(())
    }

    /// Whether [`start_recording`](Self::start_recording) would succeed.
    pub fn can_start_recording(&self) -> bool {
        self.recording_index.is_some()
            || (!self.spares.is_empty() && self.loops.len() < LOOP_LIST_CAPACITY)
    }

    /// Whether the next recording would be refused for lack of a buffer.
    pub fn needs_spare(&self) -> bool {
        self.spares.is_empty()
    }

    pub fn spare_count(&self) -> usize {
        self.spares.len()
    }

    pub fn request_clear_all(&self) {
        self.requests.clear_all.raise();
    }

    pub fn request_undo_last(&self) {
        self.requests.undo_last.raise();
    }

    /// Runs the clear/undo requests raised since the last call.
    pub fn handle_pending_requests(&mut self) {
        if self.requests.clear_all.take() {
            self.clear_all();
        }
        if self.requests.undo_last.take() {
            self.remove_last_loop();
        }
    }

    pub fn requests(&self) -> &Arc<LoopRequests> {
        &self.requests
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_request
    }

    pub fn take_stop_request(&mut self) -> bool {
        std::mem::take(&mut self.stop_request)
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    pub fn has_content(&self) -> bool {
        self.loops.iter().any(Loop::has_content)
    }

    pub fn base_length(&self) -> usize {
        self.base_length
    }

    pub fn is_recording(&self) -> bool {
        self.recording_index.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fade_samples(&self) -> usize {
        self.fade_samples
    }

    /// Replaces the whole content with restored loops.
    pub(crate) fn restore(&mut self, loops: Vec<Loop>, base_length: usize) {
        self.clear_all();
        self.loops = loops;
        self.loops.reserve(LOOP_LIST_CAPACITY);
        self.spares.reserve(self.loops.len() + 1);
        self.base_length = base_length;
        if self.base_length == 0 {
            if let Some(first) = self.loops.iter().find(|l| l.has_content) {
                self.base_length = first.length;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(start: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| start + i as f32).collect()
    }

    fn record_blocks(store: &mut LoopStore, samples: &[f32], block: usize) {
        for chunk in samples.chunks(block) {
            store.record(&[chunk]);
        }
    }

    fn mix_frames(store: &mut LoopStore, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        store.mix(&mut [&mut out[..]], 1.0);
        out
    }

    #[test]
    fn test_record_never_passes_cap() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.start_recording();
        let input = vec![0.5; 32];
        let mut total = 0;
        for _ in 0..5 {
            store.record(&[&input]);
            total += input.len();
            assert_eq!(store.write_cursor(), total.min(100));
        }
        assert_eq!(store.write_cursor(), 100);
        assert!(store.stop_requested());
        // still recording: the owner decides when to stop
        assert!(store.is_recording());
        assert_eq!(store.loops()[0].length(), 100);
    }

    #[test]
    fn test_overdub_is_capped_at_base_length() {
        let mut store = LoopStore::new(1, 1000, 0).unwrap();
        store.start_recording();
        record_blocks(&mut store, &ramp(1.0, 40), 16);
        store.stop_recording();
        assert_eq!(store.base_length(), 40);

        store.replenish().unwrap();
        store.start_recording();
        record_blocks(&mut store, &ramp(100.0, 64), 16);
        assert_eq!(store.write_cursor(), 40);
        assert!(store.take_stop_request());
        assert!(!store.stop_requested());
        store.stop_recording();
        assert_eq!(store.loops()[1].length(), 40);
        assert_eq!(store.base_length(), 40);
    }

    #[test]
    fn test_first_loop_sets_base_length() {
        let mut store = LoopStore::new(1, 1000, 0).unwrap();
        store.start_recording();
        record_blocks(&mut store, &ramp(1.0, 123), 50);
        store.stop_recording();
        let first = &store.loops()[0];
        assert!(first.has_content());
        assert_eq!(first.length(), 123);
        assert_eq!(first.start_offset(), 0);
        assert_eq!(store.base_length(), 123);
        assert!(!store.is_recording());
    }

    #[test]
    fn test_empty_recording_has_no_content() {
        let mut store = LoopStore::new(1, 1000, 10).unwrap();
        store.start_recording();
        store.stop_recording();
        assert_eq!(store.loop_count(), 1);
        assert!(!store.loops()[0].has_content());
        assert_eq!(store.base_length(), 0);
    }

    #[test]
    fn test_crossfade_blends_start_into_end() {
        const FADE: usize = 8;
        let samples = ramp(1.0, 64);
        let mut store = LoopStore::new(1, 1000, FADE).unwrap();
        store.start_recording();
        record_blocks(&mut store, &samples, 16);
        store.stop_recording();

        let recorded = store.loops()[0].samples(0);
        assert_eq!(recorded.len(), 64);
        for i in 0..FADE {
            let alpha = i as f32 / FADE as f32;
            let end = 64 - FADE + i;
            let expected = samples[end] * (1.0 - alpha) + samples[i] * alpha;
            assert_eq!(recorded[end], expected);
        }
        // the head and the middle are untouched
        assert_eq!(&recorded[..64 - FADE], &samples[..64 - FADE]);
    }

    #[test]
    fn test_crossfade_shorter_than_fade() {
        let mut store = LoopStore::new(1, 1000, 100).unwrap();
        store.start_recording();
        store.record(&[&[2.0, 4.0, 6.0, 8.0]]);
        store.stop_recording();
        // fade spans the whole loop, so sample i blends with itself
        let recorded = store.loops()[0].samples(0);
        for (i, value) in [2.0, 4.0, 6.0, 8.0].iter().enumerate() {
            assert_relative_eq!(recorded[i], *value);
        }
    }

    #[test]
    fn test_mix_wraps_at_base_length() {
        let mut store = LoopStore::new(1, 1000, 0).unwrap();
        store.start_playback();
        store.start_recording();
        let samples = ramp(1.0, 10);
        store.record(&[&samples]);
        mix_frames(&mut store, 10);
        store.stop_recording();

        let out = mix_frames(&mut store, 25);
        let expected: Vec<f32> = (0..25).map(|i| samples[i % 10]).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_mix_scales_and_adds() {
        let mut store = LoopStore::new(2, 100, 0).unwrap();
        store.start_playback();
        store.start_recording();
        store.record(&[&[1.0, 1.0, 1.0, 1.0], &[2.0, 2.0, 2.0, 2.0]]);
        store.advance(4);
        store.stop_recording();

        let mut left = vec![0.25; 4];
        let mut right = vec![0.0; 4];
        store.mix(&mut [&mut left[..], &mut right[..]], 0.5);
        assert_eq!(left, vec![0.75; 4]);
        assert_eq!(right, vec![1.0; 4]);
    }

    #[test]
    fn test_overdub_keeps_its_phase() {
        const BASE: usize = 40;
        let mut store = LoopStore::new(1, 1000, 0).unwrap();
        store.start_playback();
        store.start_recording();
        store.record(&[&vec![0.0; BASE]]);
        store.advance(BASE);
        store.stop_recording();
        assert_eq!(store.base_length(), BASE);

        // half a cycle later, overdub a single impulse
        mix_frames(&mut store, BASE / 2);
        store.replenish().unwrap();
        store.start_recording();
        let mut impulse = vec![0.0; BASE];
        impulse[0] = 1.0;
        store.record(&[&impulse]);
        assert_eq!(store.loops()[1].start_offset(), BASE / 2);
        mix_frames(&mut store, BASE / 2);
        store.stop_recording();

        // the cursor is at the end of the cycle again
        let out = mix_frames(&mut store, BASE);
        let hits: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits, vec![BASE / 2]);
    }

    #[test]
    fn test_short_overdub_is_silence_padded() {
        const BASE: usize = 16;
        let mut store = LoopStore::new(1, 1000, 0).unwrap();
        store.start_playback();
        store.start_recording();
        store.record(&[&vec![0.0; BASE]]);
        store.advance(BASE);
        store.stop_recording();

        store.replenish().unwrap();
        store.start_recording();
        store.record(&[&[1.0, 1.0, 1.0, 1.0]]);
        store.advance(4);
        store.stop_recording();
        assert_eq!(store.loops()[1].length(), BASE);
        assert!(store.loops()[1].samples(0)[4..].iter().all(|s| *s == 0.0));

        // playback resumes four samples into the cycle
        let out = mix_frames(&mut store, BASE * 2);
        let expected: Vec<f32> = (0..BASE * 2)
            .map(|i| if (i + 4) % BASE < 4 { 1.0 } else { 0.0 })
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_advance_matches_mix() {
        let mut mixed = LoopStore::new(1, 1000, 0).unwrap();
        let mut advanced = LoopStore::new(1, 1000, 0).unwrap();
        for store in [&mut mixed, &mut advanced] {
            store.start_playback();
            store.start_recording();
            store.record(&[&ramp(1.0, 30)]);
            store.advance(30);
            store.stop_recording();
        }
        for frames in [1, 7, 29, 30, 31, 64, 5] {
            mix_frames(&mut mixed, frames);
            advanced.advance(frames);
            assert_eq!(mixed.read_cursor(), advanced.read_cursor());
        }
    }

    #[test]
    fn test_not_playing_mix_is_noop() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.start_recording();
        store.record(&[&[1.0; 10]]);
        store.stop_recording();
        let out = mix_frames(&mut store, 10);
        assert_eq!(out, vec![0.0; 10]);
        assert_eq!(store.read_cursor(), 0);
    }

    #[test]
    fn test_remove_last_loop() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.remove_last_loop();
        assert_eq!(store.loop_count(), 0);
        assert_eq!(store.base_length(), 0);

        store.start_recording();
        store.record(&[&[1.0; 10]]);
        store.stop_recording();
        store.replenish().unwrap();
        store.start_recording();
        store.record(&[&[1.0; 4]]);

        store.remove_last_loop();
        assert!(!store.is_recording());
        assert_eq!(store.loop_count(), 1);
        assert_eq!(store.base_length(), 10);

        store.remove_last_loop();
        assert_eq!(store.loop_count(), 0);
        assert_eq!(store.base_length(), 0);
    }

    #[test]
    fn test_clear_all_twice_is_clear_all_once() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.start_playback();
        store.start_recording();
        store.record(&[&[1.0; 10]]);
        store.stop_recording();
        store.replenish().unwrap();
        store.start_recording();

        store.clear_all();
        let once = (
            store.loop_count(),
            store.base_length(),
            store.is_recording(),
            store.write_cursor(),
            store.read_cursor(),
        );
        store.clear_all();
        let twice = (
            store.loop_count(),
            store.base_length(),
            store.is_recording(),
            store.write_cursor(),
            store.read_cursor(),
        );
        assert_eq!(once, (0, 0, false, 0, 0));
        assert_eq!(once, twice);
        // both buffers went back to the pool
        assert_eq!(store.spare_count(), 2);
    }

    #[test]
    fn test_recycled_buffer_is_silent() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.start_recording();
        store.record(&[&[1.0; 50]]);
        store.stop_recording();
        store.remove_last_loop();

        store.start_recording();
        store.record(&[&[0.5; 10]]);
        store.stop_recording();
        let recorded = store.loops()[0].clone();
        assert_eq!(recorded.length(), 10);
        assert!(recorded.buffer[0][10..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_pending_requests_run_once() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        for _ in 0..3 {
            store.replenish().unwrap();
            store.start_recording();
            store.record(&[&[1.0; 10]]);
            store.stop_recording();
        }
        let requests = store.requests().clone();
        requests.undo_last.raise();
        requests.undo_last.raise();
        store.handle_pending_requests();
        assert_eq!(store.loop_count(), 2);
        store.handle_pending_requests();
        assert_eq!(store.loop_count(), 2);

        store.request_clear_all();
        store.handle_pending_requests();
        assert_eq!(store.loop_count(), 0);
    }

    #[test]
    fn test_render_cycle_aligns_overdubs() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        store.start_playback();
        store.start_recording();
        store.record(&[&[1.0; 8]]);
        store.advance(8);
        store.stop_recording();
        store.advance(3);
        store.replenish().unwrap();
        store.start_recording();
        store.record(&[&[2.0, 0.0]]);
        store.stop_recording();

        let cycle = store.render_cycle();
        assert_eq!(cycle.len(), 1);
        assert_eq!(cycle[0], vec![1.0, 1.0, 1.0, 3.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_adopted_timeline_caps_and_aligns() {
        let mut store = LoopStore::new(1, 1000, 0).unwrap();
        store.start_playback();
        store.advance(500);
        store.adopt_timeline(64, 10);
        assert_eq!(store.base_length(), 64);
        assert_eq!(store.read_cursor(), 10);

        store.start_recording();
        assert_eq!(store.loops()[0].start_offset(), 10);
        store.record(&[&[1.0; 100]]);
        assert_eq!(store.write_cursor(), 64);

        // a store with its own cycle keeps it
        store.adopt_timeline(32, 0);
        assert_eq!(store.base_length(), 64);
    }

    #[test]
    fn test_overdub_crossfade_lands_on_padded_end() {
        const BASE: usize = 16;
        let mut store = LoopStore::new(1, 100, 2).unwrap();
        store.start_playback();
        store.start_recording();
        store.record(&[&vec![0.0; BASE]]);
        store.advance(BASE);
        store.stop_recording();

        store.replenish().unwrap();
        store.start_recording();
        store.record(&[&[1.0, 2.0, 3.0, 4.0]]);
        store.stop_recording();

        let overdub = &store.loops()[1];
        assert_eq!(overdub.length(), store.base_length());
        let samples = overdub.samples(0);
        assert_eq!(&samples[..4], &[1.0, 2.0, 3.0, 4.0]);
        // the silent tail fades into the loop start
        assert_eq!(samples[14], 0.0);
        assert_relative_eq!(samples[15], 1.0);
    }

    #[test]
    fn test_recording_never_allocates() {
        let mut store = LoopStore::new(1, 100, 0).unwrap();
        assert_eq!(store.spare_count(), 1);
        assert!(store.start_recording());
        store.record(&[&[1.0; 10]]);
        store.stop_recording();
        assert!(store.needs_spare());

        // no spare left: refused, nothing changes
        assert!(!store.start_recording());
        assert_eq!(store.loop_count(), 1);
        assert!(!store.is_recording());

        let wrong_size = Loop::try_new(1, 50).unwrap();
        assert!(store.provide_spare(wrong_size).is_err());
        assert!(store.provide_spare(Loop::try_new(1, 100).unwrap()).is_ok());
        assert!(store.provide_spare(Loop::try_new(1, 100).unwrap()).is_err());
        assert!(store.start_recording());
        assert_eq!(store.loop_count(), 2);
    }

    #[test]
    fn test_full_loop_list_refuses_recording() {
        let mut store = LoopStore::new(1, 4, 0).unwrap();
        for _ in 0..LOOP_LIST_CAPACITY {
            store.replenish().unwrap();
            assert!(store.start_recording());
            store.record(&[&[1.0; 4]]);
            store.stop_recording();
        }
        store.replenish().unwrap();
        assert!(!store.start_recording());
        assert_eq!(store.loop_count(), LOOP_LIST_CAPACITY);

        // undo hands every buffer back without dropping any
        store.clear_all();
        assert_eq!(store.spare_count(), LOOP_LIST_CAPACITY + 1);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(LoopStore::new(1, 0, 0), Err(Error::Capacity(_))));
    }
}
