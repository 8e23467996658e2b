/// FNGR - a finger drum and synth step sequencer driven by a MIDI controller
///
/// This library provides the pieces of the sequencer:
/// - Pattern tables, drum voices and the control-key mapping
/// - A playback state machine fed by held pattern keys
/// - A frame-driven beat scheduler with drift-free deadlines
/// - MIDI input/output and an audio preview

pub mod audio;
pub mod config;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use audio::AudioOutput;
pub use config::Config;
pub use midi::{
    midi_note_name, MidiCommand, MidiEvent, MidiInputDevice, MidiOutputDevice, MidiTransport,
    NullTransport,
};
pub use sequencer::keys::{pattern_key, HeldKeys, PatternKey};
pub use sequencer::pattern::{Pattern, PatternBank, Step};
pub use sequencer::playback::{
    EngineCommand, NextFrame, PlaybackEngine, PlaybackEvent, Pose, StepView, Tick,
};
pub use sequencer::voice::{DrumPose, Hands};
pub use sequencer::{Channels, Family, Playhead, Sequencer, Tempo};
