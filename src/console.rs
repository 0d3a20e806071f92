use std::collections::{HashSet, VecDeque};

use color_eyre::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures::{FutureExt, StreamExt};
use ratatui::{
    DefaultTerminal, Frame,
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    style::{Color, Styled},
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget},
};
use ringbuf::traits::{Consumer, Producer};

use multiloop::audio::{AudioState, Command, Returned};
use multiloop::track::TrackHandle;

/// Backend messages kept on screen.
const MESSAGE_LINES: usize = 4;
const VOLUME_STEP: f32 = 0.05;

pub struct ConsoleState {
    /// Whether to exit the application.
    pub exit: bool,
    /// Index of the selected track in `audio_state.tracks`.
    pub selected: usize,
    /// The event stream for receiving terminal events.
    pub event_stream: EventStream,
    /// Recent backend and session messages, newest last.
    pub messages: VecDeque<String>,
    /// Tracks with a spare loop buffer on its way to the audio thread.
    pub spares_in_flight: HashSet<u32>,
    pub audio_state: AudioState,
}

pub async fn run(mut terminal: DefaultTerminal, audio_state: AudioState) -> Result<()> {
    let mut state = ConsoleState::new(audio_state);
    while !state.exiting() {
        state.poll_audio();
        terminal.draw(|frame| state.draw(frame))?;
        state.handle_events().await?;
    }
    Ok(())
}

impl ConsoleState {
    pub fn new(audio_state: AudioState) -> Self {
        ConsoleState {
            exit: false,
            selected: 0,
            event_stream: EventStream::new(),
            messages: VecDeque::with_capacity(MESSAGE_LINES + 1),
            spares_in_flight: HashSet::new(),
            audio_state,
        }
    }

    pub async fn handle_events(&mut self) -> Result<()> {
        let event = self.event_stream.next().fuse();
        let sleep = tokio::time::sleep(std::time::Duration::from_millis(50));
        tokio::select! {
            maybe_event = event => {
                if let Some(event) = maybe_event {
                    match event? {
                        Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                            self.handle_key_event(key_event)
                        }
                        _ => {}
                    }
                }
            },
            _ = sleep => {}
        }
        Ok(())
    }

    /// Picks up what the audio thread sent back since the last frame.
    pub fn poll_audio(&mut self) {
        while let Some(returned) = self.audio_state.returned.try_pop() {
            match returned {
                Returned::TrackAdded(handle) => {
                    log::info!("added {}", handle.name());
                    self.audio_state.tracks.push(handle);
                    self.selected = self.audio_state.tracks.len() - 1;
                }
                Returned::TrackRemoved(track) => {
                    log::info!("removed {}", track.name());
                    self.audio_state.tracks.retain(|h| h.id() != track.id());
                    self.spares_in_flight.remove(&track.id());
                    self.clamp_selection();
                }
                Returned::TrackRejected(track) => {
                    self.push_message(format!("{} was refused by the session", track.name()));
                }
                Returned::SpareStored(id) => {
                    self.spares_in_flight.remove(&id);
                }
                Returned::SpareRejected(id, _) => {
                    log::debug!("spare loop for track {id} was not needed");
                    self.spares_in_flight.remove(&id);
                }
            }
        }
        while let Ok(message) = self.audio_state.messages.try_recv() {
            self.push_message(message);
        }
        self.report_refused_recordings();
        self.refill_spares();
    }

    pub fn exiting(&self) -> bool {
        self.exit
    }

    pub fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }
}

impl ConsoleState {
    fn exit(&mut self) {
        self.exit = true;
    }

    fn push_message(&mut self, message: String) {
        if self.messages.len() == MESSAGE_LINES {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    fn selected_track(&self) -> Option<&TrackHandle> {
        self.audio_state.tracks.get(self.selected)
    }

    fn clamp_selection(&mut self) {
        self.selected = self
            .selected
            .min(self.audio_state.tracks.len().saturating_sub(1));
    }

    fn select_next(&mut self) {
        if self.selected + 1 >= self.audio_state.tracks.len() {
            self.selected = 0;
        } else {
            self.selected += 1;
        }
    }

    fn select_prev(&mut self) {
        if self.selected == 0 {
            self.selected = self.audio_state.tracks.len().saturating_sub(1);
        } else {
            self.selected -= 1;
        }
    }

    fn send(&mut self, command: Command) {
        if self.audio_state.commands.try_push(command).is_err() {
            self.push_message("command queue full, try again".to_string());
        }
    }

    fn report_refused_recordings(&mut self) {
        let refused: Vec<String> = self
            .audio_state
            .tracks
            .iter()
            .filter(|track| track.take_record_refused())
            .map(TrackHandle::name)
            .collect();
        for name in refused {
            log::warn!("{name} could not start recording, no free loop");
            self.push_message(format!("{name}: no free loop to record into"));
        }
    }

    /// Sends a fresh loop buffer to every track that used up its spare.
    fn refill_spares(&mut self) {
        let needy: Vec<u32> = self
            .audio_state
            .tracks
            .iter()
            .filter(|track| track.needs_spare() && !self.spares_in_flight.contains(&track.id()))
            .map(TrackHandle::id)
            .collect();
        for id in needy {
            match self.audio_state.factory.build_spare() {
                Ok(spare) => {
                    let command = Command::SpareLoop(id, Box::new(spare));
                    if self.audio_state.commands.try_push(command).is_err() {
                        // dropped here, retried on the next frame
                        break;
                    }
                    self.spares_in_flight.insert(id);
                }
                Err(e) => {
                    log::error!("failed to allocate a loop for track {id}: {e}");
                    self.push_message(e.to_string());
                    break;
                }
            }
        }
    }

    fn add_track(&mut self) {
        match self.audio_state.factory.build() {
            Ok(track) => self.send(Command::InsertTrack(Box::new(track))),
            Err(e) => {
                log::error!("failed to create track: {e}");
                self.push_message(e.to_string());
            }
        }
    }

    fn remove_track(&mut self) {
        if let Some(id) = self.selected_track().map(TrackHandle::id) {
            self.send(Command::RemoveTrack(id));
        }
    }

    fn toggle_play(&self) {
        let controls = &self.audio_state.controls;
        controls.set_play(!controls.is_play());
    }

    fn toggle_record(&self) {
        let controls = &self.audio_state.controls;
        let target = self
            .selected_track()
            .map_or(multiloop::session::NO_TARGET, TrackHandle::id);
        controls.set_record(!controls.is_record(), target);
    }

    fn change_volume(&self, delta: f32) {
        if let Some(track) = self.selected_track() {
            track.set_volume(track.volume() + delta);
        }
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        let controls = self.audio_state.controls.clone();
        match key_event.code {
            KeyCode::Char('q') => self.exit(),
            KeyCode::Up => self.select_prev(),
            KeyCode::Down => self.select_next(),
            KeyCode::Char('a') => self.add_track(),
            KeyCode::Char('x') => self.remove_track(),
            KeyCode::Char('X') => self.send(Command::RemoveAllTracks),
            KeyCode::Char(' ') => self.toggle_play(),
            KeyCode::Char('R') => self.toggle_record(),
            KeyCode::Char('m') => controls.set_monitor(!controls.is_monitor()),
            KeyCode::Char('C') => controls.clear_all.raise(),
            KeyCode::Char('U') => controls.undo_last.raise(),
            KeyCode::Char('+') => self.change_volume(VOLUME_STEP),
            KeyCode::Char('-') => self.change_volume(-VOLUME_STEP),
            code => {
                let Some(track) = self.selected_track() else {
                    return;
                };
                match code {
                    KeyCode::Char('r') => track.request_record_toggle(),
                    KeyCode::Char('M') => track.set_muted(!track.is_muted()),
                    KeyCode::Char('s') => track.set_soloed(!track.is_soloed()),
                    KeyCode::Char('c') => track.request_clear_all(),
                    KeyCode::Char('u') => track.request_undo_last(),
                    _ => {}
                }
            }
        }
    }
}

impl Widget for &ConsoleState {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(vec![
            " MULTIL".bold(),
            "O".set_style(Color::Rgb(26, 153, 136)).bold().italic(),
            "O".set_style(Color::Rgb(17, 85, 204)).bold().italic(),
            "P ".bold(),
        ]);
        let instructions = Line::from(vec![
            " Play ".into(),
            "<Space> ".blue().bold(),
            " Record ".into(),
            "<r/R> ".blue().bold(),
            " Add/Remove ".into(),
            "<a/x> ".blue().bold(),
            " Mute/Solo ".into(),
            "<M/s> ".blue().bold(),
            " Volume ".into(),
            "<+/-> ".blue().bold(),
            " Undo ".into(),
            "<u/U> ".blue().bold(),
            " Clear ".into(),
            "<c/C> ".blue().bold(),
            " Monitor ".into(),
            "<m> ".blue().bold(),
            " Quit ".into(),
            "<Q> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let controls = &self.audio_state.controls;
        let timeline = &self.audio_state.timeline;
        let rate = self.audio_state.sample_rate.max(1) as f64;
        let base = timeline.base_length();
        let mut texts = vec![Line::from(vec![
            if controls.is_playing() {
                "▶️ playing".green()
            } else {
                "⏹️ stopped".red()
            },
            if controls.is_monitor() {
                "  monitor on".yellow()
            } else {
                "  monitor off".into()
            },
            if base > 0 {
                format!(
                    "  loop {:.2}s at {:.2}s",
                    base as f64 / rate,
                    timeline.wrapped_read_cursor() as f64 / rate
                )
                .into()
            } else {
                "  no loop yet".italic()
            },
        ])];

        for (index, track) in self.audio_state.tracks.iter().enumerate() {
            texts.push(Line::from(vec![
                if self.selected == index {
                    ">> ".green()
                } else {
                    "".into()
                },
                if track.is_recording() {
                    "⏺️".red()
                } else if track.is_playing() {
                    "▶️".green()
                } else {
                    "⏹️".black()
                },
                format!(" {}: ", track.name()).into(),
                format!("{} loops, ", track.loop_count()).yellow(),
                format!("vol {:>3.0}%", track.volume() * 100.0).into(),
                if track.is_muted() { " M".red() } else { "".into() },
                if track.is_soloed() { " S".yellow() } else { "".into() },
            ]));
        }

        texts.push(Line::from(""));
        for message in &self.messages {
            texts.push(Line::from(message.as_str().italic()));
        }

        Paragraph::new(Text::from(texts))
            .centered()
            .block(block)
            .render(area, buf);
    }
}
