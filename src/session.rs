use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::looper::{Loop, LoopStore};
use crate::request::RequestSlot;
use crate::timeline::TimelineCoordinator;
use crate::track::{Track, TrackHandle};

/// Tracks a running session can hold. Inserting past this is refused.
pub const TRACK_LIST_CAPACITY: usize = 16;

/// Record target meaning "no track selected".
pub const NO_TARGET: u32 = u32::MAX;

/// Session-wide controls, written by the control thread and sampled once per
/// block by the audio thread.
#[derive(Debug)]
pub struct Controls {
    pub play: AtomicBool,          // Main -> Audio
    pub monitor: AtomicBool,       // Main -> Audio
    pub record: AtomicBool,        // Main -> Audio
    pub record_target: AtomicU32,  // Main -> Audio
    pub clear_all: RequestSlot,    // Main -> Audio
    pub undo_last: RequestSlot,    // Main -> Audio
    pub playing: AtomicBool,       // Audio -> Main
    pub track_count: AtomicU32,    // Audio -> Main
}

impl Default for Controls {
    fn default() -> Self {
        Controls {
            play: AtomicBool::new(false),
            monitor: AtomicBool::new(false),
            record: AtomicBool::new(false),
            record_target: AtomicU32::new(NO_TARGET),
            clear_all: RequestSlot::new(),
            undo_last: RequestSlot::new(),
            playing: AtomicBool::new(false),
            track_count: AtomicU32::new(0),
        }
    }
}

impl Controls {
    pub fn set_play(&self, play: bool) {
        self.play.store(play, Ordering::Relaxed);
    }

    pub fn is_play(&self) -> bool {
        self.play.load(Ordering::Relaxed)
    }

    pub fn set_monitor(&self, monitor: bool) {
        self.monitor.store(monitor, Ordering::Relaxed);
    }

    pub fn is_monitor(&self) -> bool {
        self.monitor.load(Ordering::Relaxed)
    }

    /// Arms (or disarms) global recording on the track with `target` id.
    ///
    /// The target is published before the flag, so a reader that sees the
    /// new flag with `Acquire` also sees the matching target.
    pub fn set_record(&self, record: bool, target: u32) {
        self.record_target.store(target, Ordering::Relaxed);
        self.record.store(record, Ordering::Release);
    }

    pub fn is_record(&self) -> bool {
        self.record.load(Ordering::Acquire)
    }

    pub fn record_target(&self) -> u32 {
        self.record_target.load(Ordering::Relaxed)
    }

    /// Whether the transport was running at the end of the last block.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn track_count(&self) -> u32 {
        self.track_count.load(Ordering::Relaxed)
    }
}

/// Builds tracks sized for a session, so the allocation can happen away
/// from the thread that owns the session.
#[derive(Debug, Clone)]
pub struct TrackFactory {
    channels: usize,
    capacity: usize,
    fade_samples: usize,
    volume: f32,
    timeline: Arc<TimelineCoordinator>,
    next_id: Arc<AtomicU32>,
}

impl TrackFactory {
    /// Allocates a new track with the next free id.
    pub fn build(&self) -> Result<Track> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.build_with_id(id)
    }

    /// Allocates a loop buffer to hand to a track whose spare was used up.
    pub fn build_spare(&self) -> Result<Loop> {
        Loop::try_new(self.channels, self.capacity)
    }

    fn build_with_id(&self, id: u32) -> Result<Track> {
        let store = LoopStore::new(self.channels, self.capacity, self.fade_samples)?;
        Ok(Track::new(id, store, self.timeline.clone(), self.volume))
    }
}

/// All tracks of one looper session, and the per-block process cycle.
///
/// The session lives on the audio thread. Other threads talk to it through
/// [`Controls`], [`TrackHandle`]s and the shared [`TimelineCoordinator`].
#[derive(Debug)]
pub struct Session {
    config: Config,
    sample_rate: u32,
    capacity: usize,
    fade_samples: usize,
    tracks: Vec<Track>,
    next_track_id: Arc<AtomicU32>,
    timeline: Arc<TimelineCoordinator>,
    controls: Arc<Controls>,
    playing: bool,
    last_play: bool,
    last_record: bool,
}

impl Session {
    pub fn new(config: Config, sample_rate: u32) -> Result<Self> {
        config.validate()?;
        let capacity = config.loop_capacity(sample_rate)?;
        let fade_samples = config.fade_samples(sample_rate);
        log::info!(
            "session prepared at {sample_rate} Hz: {} channel(s), {capacity} samples per loop",
            config.channels
        );
        Ok(Session {
            config,
            sample_rate,
            capacity,
            fade_samples,
            tracks: Vec::with_capacity(TRACK_LIST_CAPACITY),
            next_track_id: Arc::new(AtomicU32::new(0)),
            timeline: Arc::new(TimelineCoordinator::new()),
            controls: Arc::new(Controls::default()),
            playing: false,
            last_play: false,
            last_record: false,
        })
    }

    /// Re-sizes every track for a new sample rate. Recorded loops are lost.
    pub fn prepare(&mut self, sample_rate: u32) -> Result<()> {
        self.capacity = self.config.loop_capacity(sample_rate)?;
        self.fade_samples = self.config.fade_samples(sample_rate);
        self.sample_rate = sample_rate;
        self.timeline.reset_base_length();
        for track in &mut self.tracks {
            track.prepare(self.capacity, self.fade_samples)?;
        }
        self.playing = false;
        self.last_play = false;
        log::info!("session re-prepared at {sample_rate} Hz");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn controls(&self) -> &Arc<Controls> {
        &self.controls
    }

    pub fn timeline(&self) -> &Arc<TimelineCoordinator> {
        &self.timeline
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn handles(&self) -> Vec<TrackHandle> {
        self.tracks.iter().map(Track::handle).collect()
    }

    pub fn track(&self, id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    pub fn track_mut(&mut self, id: u32) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id() == id)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn track_factory(&self) -> TrackFactory {
        TrackFactory {
            channels: self.config.channels,
            capacity: self.capacity,
            fade_samples: self.fade_samples,
            volume: self.config.default_volume,
            timeline: self.timeline.clone(),
            next_id: self.next_track_id.clone(),
        }
    }

    pub fn add_track(&mut self) -> Result<TrackHandle> {
        let track = self.track_factory().build()?;
        self.tracks.reserve(1);
        let handle = self
            .insert_track(track)
            .map_err(|track| Error::DuplicateTrack(track.id()))?;
        log::debug!("added {}", handle.name());
        Ok(handle)
    }

    /// Adds a track built by [`TrackFactory`] without allocating.
    ///
    /// The track comes back untouched if its id is taken, if its buffers no
    /// longer match the session, or if the track list is full.
    pub fn insert_track(&mut self, mut track: Track) -> std::result::Result<TrackHandle, Track> {
        let looper = track.looper();
        if self.track(track.id()).is_some()
            || looper.capacity() != self.capacity
            || looper.channels() != self.config.channels
            || self.tracks.len() == self.tracks.capacity()
        {
            return Err(track);
        }
        if self.playing {
            track.start_playback_at(self.timeline.wrapped_read_cursor());
        }
        // a track built before the ids were reset keeps its own
        self.next_track_id
            .fetch_max(track.id() + 1, Ordering::Relaxed);
        track.publish();
        let handle = track.handle();
        self.tracks.push(track);
        self.publish_track_count();
        Ok(handle)
    }

    /// Takes the track out of the session and hands it back, so the caller
    /// decides which thread frees its buffers.
    pub fn remove_track(&mut self, id: u32) -> Option<Track> {
        let index = self.tracks.iter().position(|t| t.id() == id)?;
        let removed = self.tracks.remove(index);
        self.reset_timeline_if_empty();
        self.publish_track_count();
        Some(removed)
    }

    /// Takes the most recently added track out, see [`remove_track`](Self::remove_track).
    pub fn remove_last_track(&mut self) -> Option<Track> {
        let removed = self.tracks.pop()?;
        self.reset_timeline_if_empty();
        self.publish_track_count();
        Some(removed)
    }

    /// Removes every track, handing them to `retire`, and restarts id allocation.
    pub fn remove_all_tracks(&mut self, mut retire: impl FnMut(Track)) {
        while let Some(track) = self.tracks.pop() {
            retire(track);
        }
        self.timeline.reset_base_length();
        self.next_track_id.store(0, Ordering::Relaxed);
        self.publish_track_count();
    }

    /// A removed track's base length must not constrain new recordings.
    fn reset_timeline_if_empty(&self) {
        let any_loops = self.tracks.iter().any(|t| t.looper().loop_count() > 0);
        if !any_loops && self.timeline.has_base_length() {
            self.timeline.reset_base_length();
        }
    }

    /// Starts recording on `id`, stopping whichever other track was
    /// recording. Recording implies playing, so the transport starts too.
    ///
    /// A track without a free loop is left alone, as is everything else.
    /// The refusal is also flagged on its [`TrackHandle`].
    pub fn start_recording_track(&mut self, id: u32) -> Result<()> {
        let track = self.track_mut(id).ok_or(Error::UnknownTrack(id))?;
        if !track.can_start_recording() {
            track.start_recording();
            return Err(Error::NoFreeLoop(id));
        }
        for track in self.tracks.iter_mut().filter(|t| t.id() != id) {
            track.stop_recording();
        }
        if !self.playing {
            self.start_playback();
            self.controls.play.store(true, Ordering::Relaxed);
            self.last_play = true;
        }
        if let Some(track) = self.track_mut(id) {
            track.start_recording();
        }
        Ok(())
    }

    /// Hands a spare loop buffer to track `id`. The buffer comes back if the
    /// track is gone, already has a spare, or was sized differently.
    pub fn provide_spare(&mut self, id: u32, spare: Loop) -> std::result::Result<(), Loop> {
        match self.track_mut(id) {
            Some(track) => track.provide_spare(spare),
            None => Err(spare),
        }
    }

    /// Allocates a spare for every track that used its own up. Not for the
    /// audio thread.
    pub fn replenish_spares(&mut self) -> Result<()> {
        for track in &mut self.tracks {
            track.looper_mut().replenish()?;
        }
        Ok(())
    }

    pub fn stop_recording_track(&mut self, id: u32) -> Result<()> {
        let track = self.track_mut(id).ok_or(Error::UnknownTrack(id))?;
        track.stop_recording();
        Ok(())
    }

    pub fn stop_all_recording(&mut self) {
        for track in &mut self.tracks {
            track.stop_recording();
        }
    }

    pub fn recording_track(&self) -> Option<u32> {
        self.tracks.iter().find(|t| t.is_recording()).map(Track::id)
    }

    pub fn start_playback(&mut self) {
        self.playing = true;
        self.timeline.reset_read_cursor();
        for track in &mut self.tracks {
            track.start_playback();
        }
    }

    pub fn stop_playback(&mut self) {
        self.playing = false;
        for track in &mut self.tracks {
            track.stop_playback();
        }
    }

    pub fn clear_all(&mut self) {
        for track in &mut self.tracks {
            track.clear_all();
        }
        self.timeline.reset_base_length();
    }

    pub fn request_clear_all(&self) {
        self.controls.clear_all.raise();
    }

    /// Undoes the last loop of the track with the most loops.
    ///
    /// Loop count stands in for recency here: with two tracks holding the
    /// same number of loops, the earlier track is picked even if the later
    /// one recorded last.
    pub fn undo_last(&mut self) {
        if let Some(id) = self.find_track_with_most_loops() {
            if let Some(track) = self.track_mut(id) {
                track.undo_last();
            }
            self.reset_timeline_if_empty();
        }
    }

    pub fn request_undo_last(&self) {
        self.controls.undo_last.raise();
    }

    pub fn find_track_with_most_loops(&self) -> Option<u32> {
        let mut result = None;
        let mut max_loops = 0;
        for track in &self.tracks {
            let loops = track.looper().loop_count();
            if loops > max_loops {
                max_loops = loops;
                result = Some(track.id());
            }
        }
        result
    }

    pub fn is_any_track_soloed(&self) -> bool {
        self.tracks.iter().any(Track::is_soloed)
    }

    /// Runs one audio block.
    ///
    /// `output` is overwritten: it starts as a copy of `input` when
    /// monitoring and as silence otherwise, then every heard track is mixed
    /// on top of it.
    pub fn process(&mut self, input: &[&[f32]], output: &mut [&mut [f32]]) {
        self.handle_pending_requests();
        self.handle_stop_requests();
        self.handle_transport();

        for track in self.tracks.iter_mut().filter(|t| t.is_recording()) {
            track.record(input);
        }

        let monitor = self.controls.monitor.load(Ordering::Relaxed);
        for (channel, out) in output.iter_mut().enumerate() {
            match input.get(channel) {
                Some(source) if monitor => {
                    let frames = out.len().min(source.len());
                    out[..frames].copy_from_slice(&source[..frames]);
                    out[frames..].fill(0.0);
                }
                _ => out.fill(0.0),
            }
        }

        let any_soloed = self.is_any_track_soloed();
        for track in &mut self.tracks {
            track.render(output, any_soloed);
        }

        let frames = output.iter().map(|channel| channel.len()).min().unwrap_or(0);
        if self.playing && self.timeline.has_base_length() {
            self.timeline.advance_read_cursor(frames);
        }

        for track in &self.tracks {
            track.publish();
        }
        self.controls.playing.store(self.playing, Ordering::Relaxed);
    }

    fn handle_pending_requests(&mut self) {
        if self.controls.clear_all.take() {
            self.clear_all();
        }
        if self.controls.undo_last.take() {
            self.undo_last();
        }
        for track in &mut self.tracks {
            track.handle_pending_requests();
        }
        self.reset_timeline_if_empty();
    }

    /// Stops tracks whose recording filled up during the previous block.
    fn handle_stop_requests(&mut self) {
        for index in 0..self.tracks.len() {
            if self.tracks[index].take_stop_request() {
                self.tracks[index].stop_recording();
            }
        }
    }

    fn handle_transport(&mut self) {
        let play = self.controls.play.load(Ordering::Relaxed);
        if play != self.last_play {
            self.last_play = play;
            if play {
                self.start_playback();
            } else {
                self.stop_playback();
            }
        }

        let record = self.controls.record.load(Ordering::Acquire);
        if record != self.last_record {
            self.last_record = record;
            if record {
                let target = self.controls.record_target.load(Ordering::Relaxed);
                let target = if self.track(target).is_some() {
                    Some(target)
                } else {
                    self.tracks.last().map(Track::id)
                };
                // refusals are flagged on the track handle
                if let Some(target) = target {
                    let _ = self.start_recording_track(target);
                }
            } else {
                self.stop_all_recording();
            }
        }

        for index in 0..self.tracks.len() {
            if !self.tracks[index].take_record_toggle() {
                continue;
            }
            let id = self.tracks[index].id();
            if self.tracks[index].is_recording() {
                self.tracks[index].stop_recording();
            } else {
                let _ = self.start_recording_track(id);
            }
        }

        // the record control follows what actually happened
        if self.last_record && self.recording_track().is_none() {
            self.controls.record.store(false, Ordering::Relaxed);
            self.last_record = false;
        }
    }

    fn publish_track_count(&self) {
        self.controls
            .track_count
            .store(self.tracks.len() as u32, Ordering::Relaxed);
    }

    /// Rebuilds a track with a fixed id, used when restoring saved sessions.
    pub(crate) fn restore_track(&mut self, id: u32) -> Result<&mut Track> {
        if self.track(id).is_some() {
            return Err(Error::DuplicateTrack(id));
        }
        let track = self.track_factory().build_with_id(id)?;
        // leave room for tracks added while the audio thread owns the session
        self.tracks.reserve(TRACK_LIST_CAPACITY);
        self.insert_track(track)
            .map_err(|track| Error::DuplicateTrack(track.id()))?;
        self.next_track_id.fetch_max(id + 1, Ordering::Relaxed);
        self.tracks.last_mut().ok_or(Error::UnknownTrack(id))
    }

    pub(crate) fn set_transport_state(&mut self, play: bool, monitor: bool) {
        self.controls.play.store(play, Ordering::Relaxed);
        self.controls.monitor.store(monitor, Ordering::Relaxed);
        self.stop_playback();
        self.last_play = false;
    }
}
