/// MIDI output using midir
use anyhow::{anyhow, Result};
use midir::{MidiOutput, MidiOutputConnection};

use super::{encode_message, MidiCommand, MidiTransport};

const CLIENT_NAME: &str = "fngr MIDI Output";

/// Sends to one or more output ports at once.
pub struct MidiOutputDevice {
    connections: Vec<(String, MidiOutputConnection)>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    fn open(port_index: usize) -> Result<(String, MidiOutputConnection)> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| anyhow!("failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| anyhow!("invalid MIDI output port index {}", port_index))?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_out
            .connect(port, "fngr")
            .map_err(|e| anyhow!("failed to connect to {}: {}", port_name, e))?;

        log::info!(target: "midi", "output connected to {}", port_name);
        Ok((port_name, connection))
    }

    /// Send to a single port, dropping any earlier connections.
    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let connection = Self::open(port_index)?;
        self.disconnect();
        self.connections.push(connection);
        Ok(())
    }

    /// Send to every port. Ports that fail to open are logged and skipped.
    /// Returns how many are connected.
    pub fn connect_all(&mut self) -> usize {
        self.disconnect();
        for index in 0..Self::available_ports().len() {
            match Self::open(index) {
                Ok(connection) => self.connections.push(connection),
                Err(e) => log::warn!(target: "midi", "{:#}", e),
            }
        }
        self.connections.len()
    }

    /// Connect to the first port whose name contains `needle`.
    pub fn connect_named(&mut self, needle: &str) -> Result<()> {
        let index = Self::available_ports()
            .iter()
            .position(|name| name.contains(needle))
            .ok_or_else(|| anyhow!("no MIDI output port matching {:?}", needle))?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    pub fn port_names(&self) -> Vec<&str> {
        self.connections
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn disconnect(&mut self) {
        for (_, connection) in self.connections.drain(..) {
            connection.close();
        }
    }
}

impl MidiTransport for MidiOutputDevice {
    fn send(&mut self, channel: u8, command: MidiCommand, note: u8, velocity: u8) {
        let message = encode_message(channel, command, note, velocity);
        for (name, connection) in &mut self.connections {
            log::trace!(target: "midi", "send {:?} {} on {} to {}", command, note, channel, name);
            if let Err(e) = connection.send(&message) {
                log::warn!(target: "midi", "failed to send {:?} to {}: {}", command, name, e);
            }
        }
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}
