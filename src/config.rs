/// Configuration - embedded defaults merged with the user's config file
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::sequencer::pattern::PatternBank;
use crate::sequencer::{Channels, DEFAULT_BPM, LOOKAHEAD_FRAMES, NOMINAL_FRAME_SECS};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    patterns: Option<PathBuf>,
    #[serde(default)]
    midi: MidiConfig,
    #[serde(default)]
    tempo: TempoConfig,
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    audio: AudioConfig,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    control_channel: Option<u8>,
    drum_channel: Option<u8>,
    synth_channel: Option<u8>,
    input_port: Option<String>,
    output_port: Option<String>,
}

#[derive(Deserialize, Default)]
struct TempoConfig {
    bpm: Option<f64>,
}

#[derive(Deserialize, Default)]
struct TimingConfig {
    frame_rate: Option<f64>,
    lookahead_frames: Option<u32>,
}

#[derive(Deserialize, Default)]
struct AudioConfig {
    preview: Option<bool>,
}

pub struct Config {
    file: ConfigFile,
}

impl Config {
    /// Embedded defaults overlaid with the user's config file, if any.
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).context("embedded config.toml is malformed")?;

        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                let user = toml::from_str::<ConfigFile>(&contents)
                    .with_context(|| format!("parsing config {}", path.display()))?;
                merge(&mut base, user);
            }
            None => {
                if let Some(path) = user_config_path().filter(|p| p.exists()) {
                    match std::fs::read_to_string(&path) {
                        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                            Ok(user) => merge(&mut base, user),
                            Err(e) => {
                                log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                            }
                        },
                        Err(e) => {
                            log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                        }
                    }
                }
            }
        }

        Ok(Config { file: base })
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).context("embedded config.toml is malformed")?;
        merge(&mut base, toml::from_str(contents).context("parsing config")?);
        Ok(Config { file: base })
    }

    /// Channels outside 1..=16 fall back to the defaults.
    pub fn channels(&self) -> Channels {
        let fallback = Channels::default();
        let midi = &self.file.midi;
        Channels {
            control: valid_channel(midi.control_channel).unwrap_or(fallback.control),
            drum: valid_channel(midi.drum_channel).unwrap_or(fallback.drum),
            synth: valid_channel(midi.synth_channel).unwrap_or(fallback.synth),
        }
    }

    pub fn input_port(&self) -> Option<&str> {
        self.file.midi.input_port.as_deref()
    }

    pub fn output_port(&self) -> Option<&str> {
        self.file.midi.output_port.as_deref()
    }

    pub fn bpm(&self) -> f64 {
        self.file.tempo.bpm.unwrap_or(DEFAULT_BPM)
    }

    /// Host frame rate (clamped to 10..=240).
    pub fn frame_rate(&self) -> f64 {
        self.file
            .timing
            .frame_rate
            .filter(|r| r.is_finite())
            .unwrap_or(1.0 / NOMINAL_FRAME_SECS)
            .clamp(10.0, 240.0)
    }

    /// Lookahead window in seconds.
    pub fn lookahead(&self) -> f64 {
        let frames = self.file.timing.lookahead_frames.unwrap_or(LOOKAHEAD_FRAMES);
        frames.min(8) as f64 * NOMINAL_FRAME_SECS
    }

    pub fn audio_preview(&self) -> bool {
        self.file.audio.preview.unwrap_or(true)
    }

    /// The configured pattern bank, or the built-in one.
    pub fn pattern_bank(&self) -> Result<PatternBank> {
        match &self.file.patterns {
            Some(path) => PatternBank::load(path),
            None => Ok(PatternBank::builtin()),
        }
    }
}

fn valid_channel(channel: Option<u8>) -> Option<u8> {
    match channel {
        Some(c) if (1..=16).contains(&c) => Some(c),
        Some(c) => {
            log::warn!(target: "config", "ignoring MIDI channel {} (expected 1..=16)", c);
            None
        }
        None => None,
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fngr").join("config.toml"))
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    if user.patterns.is_some() {
        base.patterns = user.patterns;
    }
    merge_midi(&mut base.midi, user.midi);
    if user.tempo.bpm.is_some() {
        base.tempo.bpm = user.tempo.bpm;
    }
    if user.timing.frame_rate.is_some() {
        base.timing.frame_rate = user.timing.frame_rate;
    }
    if user.timing.lookahead_frames.is_some() {
        base.timing.lookahead_frames = user.timing.lookahead_frames;
    }
    if user.audio.preview.is_some() {
        base.audio.preview = user.audio.preview;
    }
}

fn merge_midi(base: &mut MidiConfig, user: MidiConfig) {
    if user.control_channel.is_some() {
        base.control_channel = user.control_channel;
    }
    if user.drum_channel.is_some() {
        base.drum_channel = user.drum_channel;
    }
    if user.synth_channel.is_some() {
        base.synth_channel = user.synth_channel;
    }
    if user.input_port.is_some() {
        base.input_port = user.input_port;
    }
    if user.output_port.is_some() {
        base.output_port = user.output_port;
    }
}
