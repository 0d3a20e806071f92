use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

use crate::error::Result;
use crate::looper::{Loop, LoopRequests, LoopStore};
use crate::request::RequestSlot;
use crate::timeline::TimelineCoordinator;

/// The per-track state shared between the audio thread and the controls.
#[derive(Debug)]
pub struct TrackControls {
    id: u32,
    volume: AtomicU32,                  // Main -> Audio
    muted: AtomicBool,                  // Main -> Audio
    soloed: AtomicBool,                 // Main -> Audio
    record_toggle: RequestSlot,         // Main -> Audio
    requests: Arc<LoopRequests>,        // Main -> Audio
    loop_count: AtomicUsize,            // Audio -> Main
    recording: AtomicBool,              // Audio -> Main
    playing: AtomicBool,                // Audio -> Main
    needs_spare: AtomicBool,            // Audio -> Main
    record_refused: AtomicBool,         // Audio -> Main
}

/// Cheap, cloneable handle on a track, usable from any thread.
///
/// It never owns the track itself: the session does. A handle to a removed
/// track keeps working but no longer has any effect.
#[derive(Debug, Clone)]
pub struct TrackHandle {
    controls: Arc<TrackControls>,
}

impl TrackHandle {
    pub fn id(&self) -> u32 {
        self.controls.id
    }

    pub fn name(&self) -> String {
        track_name(self.controls.id)
    }

    /// Sets the volume, clamped to `0.0..=1.0`.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.controls
            .volume
            .store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.controls.volume.load(Ordering::Relaxed))
    }

    pub fn set_muted(&self, muted: bool) {
        self.controls.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.controls.muted.load(Ordering::Relaxed)
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.controls.soloed.store(soloed, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.controls.soloed.load(Ordering::Relaxed)
    }

    /// Asks the audio thread to start recording this track, or to stop if it
    /// already is.
    pub fn request_record_toggle(&self) {
        self.controls.record_toggle.raise();
    }

    pub fn request_clear_all(&self) {
        self.controls.requests.clear_all.raise();
    }

    pub fn request_undo_last(&self) {
        self.controls.requests.undo_last.raise();
    }

    /// Number of loops as of the last processed block.
    pub fn loop_count(&self) -> usize {
        self.controls.loop_count.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.controls.recording.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.controls.playing.load(Ordering::Relaxed)
    }

    /// Whether the track has no spare buffer left for its next recording.
    pub fn needs_spare(&self) -> bool {
        self.controls.needs_spare.load(Ordering::Relaxed)
    }

    /// Whether a recording was refused since the last call.
    pub fn take_record_refused(&self) -> bool {
        self.controls.record_refused.swap(false, Ordering::Relaxed)
    }
}

fn track_name(id: u32) -> String {
    format!("Track {}", id + 1)
}

/// One looper track: a loop store plus volume, mute and solo.
#[derive(Debug)]
pub struct Track {
    store: LoopStore,
    controls: Arc<TrackControls>,
    timeline: Arc<TimelineCoordinator>,
}

impl Track {
    pub fn new(
        id: u32,
        store: LoopStore,
        timeline: Arc<TimelineCoordinator>,
        volume: f32,
    ) -> Self {
        let controls = Arc::new(TrackControls {
            id,
            volume: AtomicU32::new(0.0f32.to_bits()),
            muted: AtomicBool::new(false),
            soloed: AtomicBool::new(false),
            record_toggle: RequestSlot::new(),
            requests: store.requests().clone(),
            loop_count: AtomicUsize::new(0),
            recording: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            needs_spare: AtomicBool::new(false),
            record_refused: AtomicBool::new(false),
        });
        let track = Track {
            store,
            controls,
            timeline,
        };
        track.handle().set_volume(volume);
        track
    }

    /// Drops every loop and re-sizes the buffers for a new sample rate.
    pub fn prepare(&mut self, capacity: usize, fade_samples: usize) -> Result<()> {
        self.store.prepare(capacity, fade_samples)?;
        self.publish();
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.controls.id
    }

    pub fn name(&self) -> String {
        track_name(self.controls.id)
    }

    pub fn handle(&self) -> TrackHandle {
        TrackHandle {
            controls: self.controls.clone(),
        }
    }

    /// Starts a new loop. A track without loops of its own first joins the
    /// session's base length and phase, so its overdubs line up with the
    /// other tracks.
    ///
    /// Returns whether the track is recording afterwards. A refusal (no
    /// spare buffer, or too many loops) is reported through the handle.
    pub fn start_recording(&mut self) -> bool {
        if self.store.is_recording() {
            return true;
        }
        if self.store.base_length() == 0 && self.timeline.has_base_length() {
            self.store.adopt_timeline(
                self.timeline.base_length(),
                self.timeline.wrapped_read_cursor(),
            );
        }
        let started = self.store.start_recording();
        if !started {
            self.controls.record_refused.store(true, Ordering::Relaxed);
        }
        started
    }

    pub fn can_start_recording(&self) -> bool {
        self.store.can_start_recording()
    }

    /// See [`LoopStore::provide_spare`].
    pub fn provide_spare(&mut self, spare: Loop) -> std::result::Result<(), Loop> {
        self.store.provide_spare(spare)
    }

    /// Finalizes the current recording. If this track's first loop just set
    /// the base length and the session has none yet, the session adopts it.
    pub fn stop_recording(&mut self) {
        if !self.store.is_recording() {
            return;
        }
        self.store.stop_recording();
        let base = self.store.base_length();
        if base > 0 && !self.timeline.has_base_length() {
            self.timeline.set_base_length(base);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.store.is_recording()
    }

    pub fn start_playback(&mut self) {
        self.store.start_playback();
    }

    pub fn start_playback_at(&mut self, cursor: usize) {
        self.store.start_playback_at(cursor);
    }

    pub fn stop_playback(&mut self) {
        self.store.stop_playback();
    }

    pub fn is_playing(&self) -> bool {
        self.store.is_playing()
    }

    pub fn set_volume(&self, volume: f32) {
        self.handle().set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.controls.volume.load(Ordering::Relaxed))
    }

    pub fn set_muted(&self, muted: bool) {
        self.controls.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.controls.muted.load(Ordering::Relaxed)
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.controls.soloed.store(soloed, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.controls.soloed.load(Ordering::Relaxed)
    }

    /// Whether this track is heard, given whether any track is soloed.
    pub fn should_output(&self, any_soloed: bool) -> bool {
        if any_soloed {
            self.is_soloed() && !self.is_muted()
        } else {
            !self.is_muted()
        }
    }

    pub fn effective_volume(&self, any_soloed: bool) -> f32 {
        if self.should_output(any_soloed) {
            self.volume()
        } else {
            0.0
        }
    }

    pub fn record(&mut self, input: &[&[f32]]) {
        self.store.record(input);
    }

    /// Mixes the track into `output` if it is heard. Silent tracks still
    /// move their read cursor, so they stay in phase with the others.
    pub fn render(&mut self, output: &mut [&mut [f32]], any_soloed: bool) {
        let frames = output.iter().map(|channel| channel.len()).min().unwrap_or(0);
        if self.should_output(any_soloed) && self.store.loop_count() > 0 {
            let volume = self.effective_volume(any_soloed);
            self.store.mix(output, volume);
        } else {
            self.store.advance(frames);
        }
    }

    pub fn clear_all(&mut self) {
        self.store.clear_all();
    }

    pub fn undo_last(&mut self) {
        self.store.remove_last_loop();
    }

    pub fn request_clear_all(&self) {
        self.store.request_clear_all();
    }

    pub fn request_undo_last(&self) {
        self.store.request_undo_last();
    }

    pub fn handle_pending_requests(&mut self) {
        self.store.handle_pending_requests();
    }

    pub(crate) fn take_record_toggle(&self) -> bool {
        self.controls.record_toggle.take()
    }

    pub(crate) fn take_stop_request(&mut self) -> bool {
        self.store.take_stop_request()
    }

    /// Copies the audio-side state into the shared controls for display.
    pub(crate) fn publish(&self) {
        let controls = &self.controls;
        controls
            .loop_count
            .store(self.store.loop_count(), Ordering::Relaxed);
        controls
            .recording
            .store(self.store.is_recording(), Ordering::Relaxed);
        controls
            .playing
            .store(self.store.is_playing(), Ordering::Relaxed);
        controls
            .needs_spare
            .store(self.store.needs_spare(), Ordering::Relaxed);
    }

    pub fn looper(&self) -> &LoopStore {
        &self.store
    }

    pub fn looper_mut(&mut self) -> &mut LoopStore {
        &mut self.store
    }
}
