/// Audio preview using cpal
///
/// A handful of sine voices so the sequencer can be heard without a MIDI
/// synth attached.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

use crate::midi::{MidiCommand, MidiTransport};

/// One drum pair plus one synth pair.
const MAX_VOICES: usize = 4;
const VOICE_GAIN: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Voice {
    channel: u8,
    note: u8,
    frequency: f32,
    phase: f32,
}

/// Sounding notes shared with the audio callback, keyed by channel and note.
#[derive(Debug, Default)]
struct Voices {
    voices: Vec<Voice>,
}

impl Voices {
    fn note_on(&mut self, channel: u8, note: u8) {
        if self.voices.iter().any(|v| v.channel == channel && v.note == note) {
            return;
        }
        if self.voices.len() == MAX_VOICES {
            self.voices.remove(0);
        }
        self.voices.push(Voice {
            channel,
            note,
            frequency: midi_note_to_frequency(note),
            phase: 0.0,
        });
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        self.voices
            .retain(|v| v.channel != channel || v.note != note);
    }

    fn next_sample(&mut self, sample_rate: f32) -> f32 {
        let mut sum = 0.0;
        for voice in &mut self.voices {
            sum += (voice.phase * 2.0 * std::f32::consts::PI).sin() * VOICE_GAIN;
            voice.phase += voice.frequency / sample_rate;
            if voice.phase >= 1.0 {
                voice.phase -= 1.0;
            }
        }
        sum
    }
}

pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    voices: Arc<Mutex<Voices>>,
}

impl AudioOutput {
    pub fn new() -> Option<Self> {
        let voices = Arc::new(Mutex::new(Voices::default()));
        let stream = Self::setup_audio_stream(Arc::clone(&voices))?;

        Some(Self {
            _stream: Some(stream),
            voices,
        })
    }

    /// Preview that never opens a device.
    pub fn silent() -> Self {
        Self {
            _stream: None,
            voices: Arc::new(Mutex::new(Voices::default())),
        }
    }

    fn setup_audio_stream(voices: Arc<Mutex<Voices>>) -> Option<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let config = device.default_output_config().ok()?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut voices) = voices.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = voices.next_sample(sample_rate);
                        frame.fill(sample);
                    }
                },
                |err| log::error!(target: "audio", "audio stream error: {}", err),
                None,
            ),
            format => {
                log::warn!(target: "audio", "unsupported sample format {:?}, preview disabled", format);
                return None;
            }
        };

        match stream {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    log::warn!(target: "audio", "could not start audio stream: {}", e);
                }
                Some(stream)
            }
            Err(e) => {
                log::warn!(target: "audio", "could not open audio stream: {}", e);
                None
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self._stream.is_some()
    }

    pub fn note_on(&mut self, channel: u8, note: u8) {
        if let Ok(mut voices) = self.voices.lock() {
            voices.note_on(channel, note);
        }
    }

    pub fn note_off(&mut self, channel: u8, note: u8) {
        if let Ok(mut voices) = self.voices.lock() {
            voices.note_off(channel, note);
        }
    }

    pub fn silence(&mut self) {
        if let Ok(mut voices) = self.voices.lock() {
            voices.voices.clear();
        }
    }

    /// `(channel, note)` of every sounding voice, oldest first.
    pub fn sounding(&self) -> Vec<(u8, u8)> {
        self.voices
            .lock()
            .map(|voices| voices.voices.iter().map(|v| (v.channel, v.note)).collect())
            .unwrap_or_default()
    }
}

impl MidiTransport for AudioOutput {
    fn send(&mut self, channel: u8, command: MidiCommand, note: u8, _velocity: u8) {
        match command {
            MidiCommand::NoteOn => self.note_on(channel, note),
            MidiCommand::NoteOff => self.note_off(channel, note),
        }
    }
}

impl Default for AudioOutput {
    fn default() -> Self {
        Self::new().unwrap_or_else(Self::silent)
    }
}

pub fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}
