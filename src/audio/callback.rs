use jack::{AudioIn, AudioOut, Client, Control, Port, ProcessScope};

use crate::commands::CommandDispatcher;
use crate::config::MAX_CHANNELS;
use crate::session::Session;

/// The JACK process handler. Owns the session for as long as the client is
/// active; [`Processor::into_session`] gets it back after deactivation.
pub struct Processor {
    session: Session,
    in_ports: Vec<Port<AudioIn>>,
    out_ports: Vec<Port<AudioOut>>,
    dispatcher: CommandDispatcher,
}

impl Processor {
    pub fn new(
        session: Session,
        in_ports: Vec<Port<AudioIn>>,
        out_ports: Vec<Port<AudioOut>>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        Processor {
            session,
            in_ports,
            out_ports,
            dispatcher,
        }
    }

    pub fn into_session(self) -> Session {
        self.session
    }

}

impl jack::ProcessHandler for Processor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        self.dispatcher.dispatch(&mut self.session);

        let channels = self.in_ports.len().min(self.out_ports.len()).min(MAX_CHANNELS);
        let mut inputs: [&[f32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
        let mut outputs: [&mut [f32]; MAX_CHANNELS] = Default::default();
        for (slot, port) in inputs.iter_mut().zip(&self.in_ports) {
            *slot = port.as_slice(ps);
        }
        for (slot, port) in outputs.iter_mut().zip(self.out_ports.iter_mut()) {
            *slot = port.as_mut_slice(ps);
        }

        self.session
            .process(&inputs[..channels], &mut outputs[..channels]);
        Control::Continue
    }
}
