/// MIDI message types, parsing and the transport seam used by the sequencer
mod input;
mod output;

pub use input::MidiInputDevice;
pub use output::MidiOutputDevice;

/// Velocity used for every outgoing note-on and note-off.
pub const FULL_VELOCITY: u8 = 127;

/// Outgoing channel-voice commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiCommand {
    NoteOn,
    NoteOff,
}

impl MidiCommand {
    pub fn status(self) -> u8 {
        match self {
            MidiCommand::NoteOn => 0x90,
            MidiCommand::NoteOff => 0x80,
        }
    }
}

/// Incoming note event. `channel` is 1-based (1..=16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8 },
    NoteOff { channel: u8, note: u8 },
}

impl MidiEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. } | MidiEvent::NoteOff { channel, .. } => channel,
        }
    }
}

/// Anything that accepts outgoing note messages.
///
/// Implementations must not block and must treat a missing device as a no-op.
pub trait MidiTransport {
    fn send(&mut self, channel: u8, command: MidiCommand, note: u8, velocity: u8);
}

/// Transport with nothing attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl MidiTransport for NullTransport {
    fn send(&mut self, _channel: u8, _command: MidiCommand, _note: u8, _velocity: u8) {}
}

impl<T: MidiTransport + ?Sized> MidiTransport for Box<T> {
    fn send(&mut self, channel: u8, command: MidiCommand, note: u8, velocity: u8) {
        (**self).send(channel, command, note, velocity)
    }
}

/// Encode a channel-voice message. `channel` is 1-based.
pub fn encode_message(channel: u8, command: MidiCommand, note: u8, velocity: u8) -> [u8; 3] {
    let channel = channel.clamp(1, 16) - 1;
    [command.status() | channel, note & 0x7f, velocity & 0x7f]
}

/// Parse raw MIDI bytes. Only note messages are kept; a note-on with
/// velocity 0 counts as a note-off.
pub fn parse_message(data: &[u8]) -> Option<MidiEvent> {
    if data.len() < 3 {
        return None;
    }

    let channel = (data[0] & 0x0f) + 1;
    let note = data[1] & 0x7f;
    let velocity = data[2] & 0x7f;

    match data[0] & 0xf0 {
        0x90 if velocity > 0 => Some(MidiEvent::NoteOn { channel, note }),
        0x90 | 0x80 => Some(MidiEvent::NoteOff { channel, note }),
        _ => None,
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
