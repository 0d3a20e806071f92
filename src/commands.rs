use ringbuf::{
    HeapCons, HeapProd,
    traits::{Consumer, Observer, Producer},
};

use crate::looper::Loop;
use crate::session::Session;
use crate::track::{Track, TrackHandle};

/// Structural changes, applied by the audio thread between blocks.
#[derive(Debug)]
pub enum Command {
    /// A track built by [`TrackFactory`](crate::TrackFactory) on the control thread.
    InsertTrack(Box<Track>),
    RemoveTrack(u32),
    RemoveAllTracks,
    /// A loop buffer for a track that used up its spare.
    SpareLoop(u32, Box<Loop>),
}

/// What the audio thread hands back, so buffers are freed off it.
#[derive(Debug)]
pub enum Returned {
    TrackAdded(TrackHandle),
    TrackRemoved(Box<Track>),
    /// The session refused the track (full, stale buffers or id taken).
    TrackRejected(Box<Track>),
    SpareStored(u32),
    /// The track is gone or already had a spare.
    SpareRejected(u32, Box<Loop>),
}

/// Applies queued [`Command`]s to a session on the audio thread.
///
/// A command is only taken once its reply fits into the return queue, so
/// nothing owned by a command is ever freed on the audio thread. Removing
/// every track spans as many blocks as the return queue needs; commands
/// queued behind it wait.
pub struct CommandDispatcher {
    commands: HeapCons<Command>,
    returned: HeapProd<Returned>,
    removing_all: bool,
}

impl CommandDispatcher {
    pub fn new(commands: HeapCons<Command>, returned: HeapProd<Returned>) -> Self {
        CommandDispatcher {
            commands,
            returned,
            removing_all: false,
        }
    }

    /// Whether a track removal is still in progress.
    pub fn is_removing_all(&self) -> bool {
        self.removing_all
    }

    pub fn dispatch(&mut self, session: &mut Session) {
        if self.removing_all {
            self.drain_tracks(session);
            if self.removing_all {
                return;
            }
        }
        while self.returned.vacant_len() > 0 {
            let Some(command) = self.commands.try_pop() else {
                break;
            };
            match command {
                Command::InsertTrack(track) => match session.insert_track(*track) {
                    Ok(handle) => self.reply(Returned::TrackAdded(handle)),
                    Err(track) => self.reply(Returned::TrackRejected(Box::new(track))),
                },
                Command::RemoveTrack(id) => {
                    if let Some(track) = session.remove_track(id) {
                        self.reply(Returned::TrackRemoved(Box::new(track)));
                    }
                }
                Command::RemoveAllTracks => {
                    self.removing_all = true;
                    self.drain_tracks(session);
                    if self.removing_all {
                        return;
                    }
                }
                Command::SpareLoop(id, spare) => match session.provide_spare(id, *spare) {
                    Ok(()) => self.reply(Returned::SpareStored(id)),
                    Err(spare) => self.reply(Returned::SpareRejected(id, Box::new(spare))),
                },
            }
        }
    }

    fn drain_tracks(&mut self, session: &mut Session) {
        while self.returned.vacant_len() > 0 {
            let Some(track) = session.remove_last_track() else {
                break;
            };
            self.reply(Returned::TrackRemoved(Box::new(track)));
        }
        if session.tracks().is_empty() {
            // resets ids and the timeline; no track is left to retire
            session.remove_all_tracks(drop);
            self.removing_all = false;
        }
    }

    /// Room in the return queue is checked before a command is taken.
    fn reply(&mut self, reply: Returned) {
        let _ = self.returned.try_push(reply);
    }
}
