/// MIDI input using midir
use anyhow::{anyhow, Result};
use midir::{Ignore, MidiInput, MidiInputConnection};

use super::{parse_message, MidiEvent};

const CLIENT_NAME: &str = "fngr MIDI Input";

/// Forwards parsed note events from one or more input ports to a callback
/// running on midir's thread.
pub struct MidiInputDevice {
    connections: Vec<(String, MidiInputConnection<()>)>,
}

impl MidiInputDevice {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_in) = MidiInput::new(CLIENT_NAME) {
            midi_in
                .ports()
                .iter()
                .filter_map(|p| midi_in.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    fn open<F>(port_index: usize, mut on_event: F) -> Result<(String, MidiInputConnection<()>)>
    where
        F: FnMut(MidiEvent) + Send + 'static,
    {
        let mut midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|e| anyhow!("failed to create MIDI input: {}", e))?;
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| anyhow!("invalid MIDI input port index {}", port_index))?;
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_in
            .connect(
                port,
                "fngr-input",
                move |_timestamp, message, _| {
                    if let Some(event) = parse_message(message) {
                        on_event(event);
                    }
                },
                (),
            )
            .map_err(|e| anyhow!("failed to connect to {}: {}", port_name, e))?;

        log::info!(target: "midi", "input connected to {}", port_name);
        Ok((port_name, connection))
    }

    /// Listen on a single port, dropping any earlier connections.
    pub fn connect<F>(&mut self, port_index: usize, on_event: F) -> Result<()>
    where
        F: FnMut(MidiEvent) + Send + 'static,
    {
        self.disconnect();
        self.connections.push(Self::open(port_index, on_event)?);
        Ok(())
    }

    /// Listen on every port. Ports that fail to open are logged and skipped.
    /// Returns how many are connected.
    pub fn connect_all<F>(&mut self, on_event: F) -> usize
    where
        F: FnMut(MidiEvent) + Clone + Send + 'static,
    {
        self.disconnect();
        for index in 0..Self::available_ports().len() {
            match Self::open(index, on_event.clone()) {
                Ok(connection) => self.connections.push(connection),
                Err(e) => log::warn!(target: "midi", "{:#}", e),
            }
        }
        self.connections.len()
    }

    /// Connect to the first port whose name contains `needle`.
    pub fn connect_named<F>(&mut self, needle: &str, on_event: F) -> Result<()>
    where
        F: FnMut(MidiEvent) + Send + 'static,
    {
        let index = Self::available_ports()
            .iter()
            .position(|name| name.contains(needle))
            .ok_or_else(|| anyhow!("no MIDI input port matching {:?}", needle))?;
        self.connect(index, on_event)
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

impl Default for MidiInputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiInputDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}
