/// Core sequencer logic - tempo, playheads, held keys and the playback state machine
///
/// Two families (drum and synth) each follow the pattern of the most recently
/// held control key. Every transition returns the events it produced so the
/// caller decides where MIDI and visual updates go.
use std::fmt;

pub mod keys;
pub mod pattern;
pub mod playback;
pub mod voice;

use crate::midi::{MidiEvent, FULL_VELOCITY};
use keys::{pattern_key, HeldKeys};
use pattern::{PatternBank, PATTERNS_PER_FAMILY};
use playback::{PlaybackEvent, Schedule};

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Frame period the lookahead is measured in.
pub const NOMINAL_FRAME_SECS: f64 = 1.0 / 60.0;
pub const LOOKAHEAD_FRAMES: u32 = 2;

const BPM_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Drum,
    Synth,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::Drum, Family::Synth];
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Drum => write!(f, "drum"),
            Family::Synth => write!(f, "synth"),
        }
    }
}

/// 1-based MIDI channels for pattern selection and the two outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub control: u8,
    pub drum: u8,
    pub synth: u8,
}

impl Channels {
    pub fn output(&self, family: Family) -> u8 {
        match family {
            Family::Drum => self.drum,
            Family::Synth => self.synth,
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            control: 14,
            drum: 1,
            synth: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
    step_duration: f64,
}

impl Tempo {
    pub fn new(bpm: f64) -> Self {
        let mut tempo = Self {
            bpm: DEFAULT_BPM,
            step_duration: step_duration(DEFAULT_BPM),
        };
        tempo.set_bpm(bpm);
        tempo
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Seconds per sixteenth-note step.
    pub fn step_duration(&self) -> f64 {
        self.step_duration
    }

    /// Returns true when the tempo actually changed.
    pub fn set_bpm(&mut self, bpm: f64) -> bool {
        if !bpm.is_finite() {
            log::warn!(target: "sequencer", "ignoring non-finite bpm {}", bpm);
            return false;
        }
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if (bpm - self.bpm).abs() <= BPM_EPSILON {
            return false;
        }
        self.bpm = bpm;
        self.step_duration = step_duration(bpm);
        true
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

fn step_duration(bpm: f64) -> f64 {
    60.0 / bpm / 4.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Playhead {
    pub pattern: usize,
    pub step: usize,
}

/// Notes a family is currently sounding, with the channel each went out on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveNotes {
    notes: Vec<(u8, u8)>,
}

impl ActiveNotes {
    fn push(&mut self, channel: u8, note: u8) {
        debug_assert!(self.notes.len() < 2, "a step sounds at most two notes");
        self.notes.push((channel, note));
    }

    fn take(&mut self) -> Vec<(u8, u8)> {
        std::mem::take(&mut self.notes)
    }

    pub fn notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.notes.iter().map(|&(_, note)| note)
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }
}

#[derive(Debug, Clone)]
struct Track {
    family: Family,
    held: HeldKeys,
    playhead: Playhead,
    active: ActiveNotes,
    playing: bool,
}

impl Track {
    fn new(family: Family) -> Self {
        Self {
            family,
            held: HeldKeys::new(),
            playhead: Playhead::default(),
            active: ActiveNotes::default(),
            playing: false,
        }
    }

    /// Note-off for everything sounding. `at` is the deadline the release
    /// belongs to, `None` for immediate.
    fn flush(&mut self, at: Option<f64>, events: &mut Vec<PlaybackEvent>) {
        for (channel, note) in self.active.take() {
            events.push(PlaybackEvent::NoteOff {
                family: self.family,
                channel,
                note,
                velocity: FULL_VELOCITY,
                at,
            });
        }
    }
}

pub struct Sequencer {
    bank: PatternBank,
    channels: Channels,
    tempo: Tempo,
    drum: Track,
    synth: Track,
    playing: bool,
    frames_requested: bool,
    schedule: Schedule,
}

impl Sequencer {
    pub fn new(bank: PatternBank) -> Self {
        Self {
            bank,
            channels: Channels::default(),
            tempo: Tempo::default(),
            drum: Track::new(Family::Drum),
            synth: Track::new(Family::Synth),
            playing: false,
            frames_requested: false,
            schedule: Schedule::new(LOOKAHEAD_FRAMES as f64 * NOMINAL_FRAME_SECS),
        }
    }

    pub fn with_channels(mut self, channels: Channels) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.tempo.set_bpm(bpm);
        self
    }

    /// Lookahead window in seconds before a deadline at which a step is
    /// prepared.
    pub fn with_lookahead(mut self, lookahead: f64) -> Self {
        self.schedule = Schedule::new(lookahead.max(0.0));
        self
    }

    pub fn bank(&self) -> &PatternBank {
        &self.bank
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Sounding notes keep the channel they started on, so this is safe
    /// mid-playback.
    pub fn set_channels(&mut self, channels: Channels) {
        self.channels = channels;
    }

    pub fn tempo(&self) -> &Tempo {
        &self.tempo
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn family_playing(&self, family: Family) -> bool {
        self.track(family).playing
    }

    pub fn playhead(&self, family: Family) -> Playhead {
        self.track(family).playhead
    }

    pub fn held(&self, family: Family) -> &HeldKeys {
        &self.track(family).held
    }

    pub fn active_notes(&self, family: Family) -> &ActiveNotes {
        &self.track(family).active
    }

    /// Whether the host should keep invoking [`Sequencer::tick`].
    pub fn wants_frame(&self) -> bool {
        self.frames_requested
    }

    fn track(&self, family: Family) -> &Track {
        match family {
            Family::Drum => &self.drum,
            Family::Synth => &self.synth,
        }
    }

    fn track_mut(&mut self, family: Family) -> &mut Track {
        match family {
            Family::Drum => &mut self.drum,
            Family::Synth => &mut self.synth,
        }
    }

    /// Feed one incoming MIDI event. Only mapped keys on the control channel
    /// do anything.
    pub fn handle_midi(&mut self, event: MidiEvent) -> Vec<PlaybackEvent> {
        if event.channel() != self.channels.control {
            return Vec::new();
        }
        match event {
            MidiEvent::NoteOn { note, .. } => match pattern_key(note) {
                Some(key) => self.press(key.family, key.pattern),
                None => Vec::new(),
            },
            MidiEvent::NoteOff { note, .. } => match pattern_key(note) {
                Some(key) => self.release(key.family, key.pattern),
                None => Vec::new(),
            },
        }
    }

    /// A pattern key went down.
    pub fn press(&mut self, family: Family, pattern: usize) -> Vec<PlaybackEvent> {
        assert!(
            pattern < PATTERNS_PER_FAMILY,
            "{} pattern index {} out of range",
            family,
            pattern
        );
        let mut events = Vec::new();

        let track = self.track_mut(family);
        track.held.press(pattern);
        track.playhead.pattern = pattern;
        if !track.playing {
            track.playing = true;
            log::debug!(target: "sequencer", "{} playing pattern {}", family, pattern);
        }

        if !self.playing {
            self.start(&mut events);
        }
        events
    }

    /// A pattern key came up.
    pub fn release(&mut self, family: Family, pattern: usize) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();

        let track = self.track_mut(family);
        if !track.held.release(pattern) {
            return events;
        }
        match track.held.current() {
            Some(current) => track.playhead.pattern = current,
            None => {
                track.playing = false;
                track.flush(None, &mut events);
                events.push(PlaybackEvent::Idle(family));
                log::debug!(target: "sequencer", "{} stopped", family);
            }
        }

        if self.playing && !self.drum.playing && !self.synth.playing {
            self.stop(&mut events);
        }
        events
    }

    /// Drop every held key and silence both families.
    pub fn all_notes_off(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        for family in Family::ALL {
            let track = self.track_mut(family);
            track.held.clear();
            if track.playing {
                track.playing = false;
                events.push(PlaybackEvent::Idle(family));
            }
        }
        if self.playing {
            self.stop(&mut events);
        } else {
            self.drum.flush(None, &mut events);
            self.synth.flush(None, &mut events);
        }
        events
    }

    /// Release whatever is sounding right now. Held keys, playheads and the
    /// schedule are untouched, so playback carries on with the next step.
    pub fn flush_notes(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        self.drum.flush(None, &mut events);
        self.synth.flush(None, &mut events);
        events
    }

    /// Change the tempo. Deadlines already reached keep their times; the new
    /// step duration counts from the last emitted step.
    pub fn set_bpm(&mut self, bpm: f64) -> Vec<PlaybackEvent> {
        if !self.tempo.set_bpm(bpm) {
            return Vec::new();
        }
        self.schedule.rebase();
        log::debug!(target: "sequencer", "tempo {} bpm", self.tempo.bpm());
        vec![PlaybackEvent::Tempo {
            bpm: self.tempo.bpm(),
            step_duration: self.tempo.step_duration(),
        }]
    }

    fn start(&mut self, events: &mut Vec<PlaybackEvent>) {
        self.playing = true;
        self.drum.playhead.step = 0;
        self.synth.playhead.step = 0;
        self.schedule.restart();
        self.frames_requested = true;
        events.push(PlaybackEvent::Started);
        log::info!(target: "sequencer", "playback started");
    }

    fn stop(&mut self, events: &mut Vec<PlaybackEvent>) {
        self.playing = false;
        self.drum.flush(None, events);
        self.synth.flush(None, events);
        events.push(PlaybackEvent::Stopped);
        log::info!(target: "sequencer", "playback stopped");
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(PatternBank::builtin())
    }
}
