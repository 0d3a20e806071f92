use color_eyre::{Result, eyre::eyre};
use jack::PortFlags;
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::Split};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::commands::CommandDispatcher;
use crate::config::Config;
use crate::persist::SessionState;
use crate::session::{Controls, Session, TRACK_LIST_CAPACITY, TrackFactory};
use crate::timeline::TimelineCoordinator;
use crate::track::TrackHandle;

mod callback;
mod notifications;

pub use crate::commands::{Command, Returned};
pub use callback::Processor;
pub use notifications::Notifications;

pub struct AudioState {
    pub controls: Arc<Controls>,                   // Main -> Audio
    pub timeline: Arc<TimelineCoordinator>,        // Audio -> Main
    pub commands: HeapProd<Command>,               // Main -> Audio
    pub returned: HeapCons<Returned>,              // Audio -> Main
    pub messages: mpsc::UnboundedReceiver<String>, // Audio -> Main
    pub factory: TrackFactory,
    pub tracks: Vec<TrackHandle>,
    pub sample_rate: u32,
}

pub type ActiveClient = jack::AsyncClient<Notifications, Processor>;

pub fn audio_setup(
    config: Config,
    restore: Option<&SessionState>,
) -> Result<(ActiveClient, AudioState)> {
    // jack's own messages would go straight to the terminal the UI draws on
    jack::set_logger(jack::LoggerType::None);

    let (client, _status) =
        jack::Client::new(&config.client_name, jack::ClientOptions::NO_START_SERVER)?;
    let sample_rate = client.sample_rate() as u32;
    log::info!(
        "JACK client '{}' created (sample rate: {sample_rate}, buffer size: {})",
        client.name(),
        client.buffer_size()
    );

    let mut session = Session::new(config.clone(), sample_rate)?;
    match restore {
        Some(state) => session.restore_state(state)?,
        None => {
            session.add_track()?;
        }
    }

    let mut in_ports = Vec::with_capacity(config.channels);
    let mut out_ports = Vec::with_capacity(config.channels);
    for channel in 1..=config.channels {
        in_ports.push(client.register_port(&format!("in_{channel}"), jack::AudioIn::default())?);
        out_ports.push(client.register_port(&format!("out_{channel}"), jack::AudioOut::default())?);
    }

    let (commands, command_rx) = HeapRb::<Command>::new(config.command_capacity).split();
    // removing every track fits into one block
    let return_capacity = config.command_capacity.max(TRACK_LIST_CAPACITY);
    let (returned_tx, returned) = HeapRb::<Returned>::new(return_capacity).split();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    let controls = session.controls().clone();
    let timeline = session.timeline().clone();
    let factory = session.track_factory();
    let tracks = session.handles();

    let notification_handler = Notifications { tx: message_tx };
    let dispatcher = CommandDispatcher::new(command_rx, returned_tx);
    let processor = Processor::new(session, in_ports, out_ports, dispatcher);

    let active_client = client.activate_async(notification_handler, processor)?;
    log::info!("JACK client activated");

    if config.auto_connect {
        if let Err(e) = auto_connect(active_client.as_client(), config.channels) {
            log::warn!("could not auto-connect to physical ports: {e}");
        }
    }

    let state = AudioState {
        controls,
        timeline,
        commands,
        returned,
        messages: message_rx,
        factory,
        tracks,
        sample_rate,
    };
    Ok((active_client, state))
}

/// Connects our ports to the first physical capture and playback ports.
/// With a mono session, the single output feeds every playback port.
fn auto_connect(client: &jack::Client, channels: usize) -> Result<()> {
    let name = client.name().to_string();

    let src_ports = client.ports(
        None,
        Some("32 bit float mono audio"),
        PortFlags::IS_OUTPUT.union(PortFlags::IS_PHYSICAL),
    );
    for (channel, port) in src_ports.iter().take(channels).enumerate() {
        client.connect_ports_by_name(port, &format!("{name}:in_{}", channel + 1))?;
    }

    let dest_ports = client.ports(
        None,
        Some("32 bit float mono audio"),
        PortFlags::IS_INPUT.union(PortFlags::IS_PHYSICAL),
    );
    if dest_ports.is_empty() {
        return Err(eyre!("no physical playback ports"));
    }
    for (index, port) in dest_ports.iter().enumerate().take(channels.max(2)) {
        let channel = index % channels + 1;
        client.connect_ports_by_name(&format!("{name}:out_{channel}"), port)?;
    }
    Ok(())
}
