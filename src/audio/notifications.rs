use tokio::sync::mpsc;

/// Forwards JACK server events to the control thread as display messages.
/// Events that affect the session are also logged.
pub struct Notifications {
    pub tx: mpsc::UnboundedSender<String>,
}

impl Notifications {
    fn send(&self, message: String) {
        let _ = self.tx.send(format!("JACK: {message}"));
    }
}

impl jack::NotificationHandler for Notifications {
    /// Runs in a signal context, see <https://man7.org/linux/man-pages/man7/signal-safety.7.html>.
    unsafe fn shutdown(&mut self, _: jack::ClientStatus, _: &str) {}

    fn sample_rate(&mut self, _: &jack::Client, srate: jack::Frames) -> jack::Control {
        // loops are not resampled; they keep their length in samples
        log::warn!("JACK sample rate changed to {srate}");
        self.send(format!("sample rate changed to {srate}"));
        jack::Control::Continue
    }

    fn client_registration(&mut self, _: &jack::Client, name: &str, is_reg: bool) {
        self.send(format!(
            "{} client \"{name}\"",
            if is_reg { "registered" } else { "unregistered" },
        ));
    }

    fn ports_connected(
        &mut self,
        client: &jack::Client,
        port_id_a: jack::PortId,
        port_id_b: jack::PortId,
        are_connected: bool,
    ) {
        let name = |id| {
            client
                .port_by_id(id)
                .and_then(|port| port.name().ok())
                .unwrap_or_else(|| format!("#{id}"))
        };
        self.send(format!(
            "{} {} {}",
            name(port_id_a),
            if are_connected { "->" } else { "-/->" },
            name(port_id_b),
        ));
    }

    fn xrun(&mut self, _: &jack::Client) -> jack::Control {
        log::warn!("JACK xrun (audio dropout)");
        self.send("xrun occurred".to_string());
        jack::Control::Continue
    }
}
