#[cfg(feature = "gui")]
use eframe::egui;

use std::path::PathBuf;

use anyhow::Result;
#[cfg(feature = "gui")]
use fngr::sequencer::keys::WHITE_KEYS;
use fngr::{
    midi_note_name, AudioOutput, Config, EngineCommand, Family, MidiEvent, MidiInputDevice,
    MidiOutputDevice, PlaybackEngine, PlaybackEvent, Pose, Sequencer,
};

struct Args {
    verbose: bool,
    list_ports: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    Args {
        verbose: args.iter().any(|a| a == "--verbose" || a == "-v"),
        list_ports: args.iter().any(|a| a == "--list-ports"),
        config: args
            .iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1))
            .map(PathBuf::from),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_ports() {
    println!("MIDI inputs:");
    for (i, name) in MidiInputDevice::available_ports().iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    println!("MIDI outputs:");
    for (i, name) in MidiOutputDevice::available_ports().iter().enumerate() {
        println!("  {}: {}", i, name);
    }
}

fn names(ports: Vec<&str>) -> Vec<String> {
    ports.into_iter().map(str::to_string).collect()
}

#[cfg_attr(not(feature = "gui"), allow(dead_code))]
fn port_label(names: &[String]) -> String {
    match names {
        [] => "Select port...".to_string(),
        [name] => name.clone(),
        _ => format!("{} ports", names.len()),
    }
}

/// Last thing shown for one family.
#[derive(Default)]
struct FamilyView {
    playing: bool,
    pattern: usize,
    step: usize,
    pose: Option<Pose>,
}

impl FamilyView {
    fn describe(&self, family: Family) -> String {
        if !self.playing {
            return format!("{:<5}  idle", family.to_string());
        }
        let pose = match &self.pose {
            None => "rest".to_string(),
            Some(Pose::Drum(pose)) => format!(
                "face {}  hands {}  cowbell {}  hit {}",
                pose.face,
                pose.hands,
                if pose.cowbell { "on" } else { "off" },
                pose.layers().collect::<Vec<_>>().join("+"),
            ),
            Some(Pose::Synth { notes }) => notes
                .iter()
                .map(|&n| midi_note_name(n))
                .collect::<Vec<_>>()
                .join(" "),
        };
        format!(
            "{:<5}  pattern {}  step {:02}  {}",
            family.to_string(),
            self.pattern + 1,
            self.step + 1,
            pose
        )
    }
}

/// Engine, devices and projection state shared by both frontends.
struct Session {
    engine: PlaybackEngine,
    input: MidiInputDevice,
    output_names: Vec<String>,
    audio: Option<AudioOutput>,
    control_channel: u8,
    bpm: f64,
    drum: FamilyView,
    synth: FamilyView,
}

impl Session {
    fn open(config: &Config) -> Result<Self> {
        let channels = config.channels();
        let sequencer = Sequencer::new(config.pattern_bank()?)
            .with_channels(channels)
            .with_bpm(config.bpm())
            .with_lookahead(config.lookahead());
        let bpm = sequencer.tempo().bpm();

        // Without a configured port, play to every output.
        let mut output = MidiOutputDevice::new();
        match config.output_port() {
            Some(name) => {
                if let Err(e) = output.connect_named(name) {
                    log::warn!(target: "midi", "{:#}", e);
                }
            }
            None => {
                output.connect_all();
            }
        }
        let output_names = names(output.port_names());
        if output_names.is_empty() {
            log::info!(target: "midi", "no MIDI output connected, visual feedback only");
        }

        let engine = PlaybackEngine::start(sequencer, Box::new(output), config.frame_rate());

        let mut session = Self {
            engine,
            input: MidiInputDevice::new(),
            output_names,
            audio: config.audio_preview().then(AudioOutput::default),
            control_channel: channels.control,
            bpm,
            drum: FamilyView::default(),
            synth: FamilyView::default(),
        };

        let connected = match config.input_port() {
            Some(name) => {
                let tx = session.engine.sender();
                session.input.connect_named(name, move |event| {
                    let _ = tx.send(EngineCommand::Midi(event));
                })
            }
            None => {
                session.connect_all_inputs();
                Ok(())
            }
        };
        if let Err(e) = connected {
            log::warn!(target: "midi", "{:#}", e);
        }
        Ok(session)
    }

    #[cfg_attr(not(feature = "gui"), allow(dead_code))]
    fn connect_input(&mut self, index: usize) -> Result<()> {
        let tx = self.engine.sender();
        self.input.connect(index, move |event| {
            let _ = tx.send(EngineCommand::Midi(event));
        })
    }

    fn connect_all_inputs(&mut self) {
        let tx = self.engine.sender();
        let connected = self.input.connect_all(move |event| {
            let _ = tx.send(EngineCommand::Midi(event));
        });
        log::debug!(target: "midi", "listening on {} input ports", connected);
    }

    /// `None` means every port.
    #[cfg_attr(not(feature = "gui"), allow(dead_code))]
    fn connect_output(&mut self, index: Option<usize>) -> Result<()> {
        let mut output = MidiOutputDevice::new();
        match index {
            Some(index) => output.connect(index)?,
            None => {
                output.connect_all();
            }
        }
        self.output_names = names(output.port_names());
        self.engine.send(EngineCommand::SetTransport(Box::new(output)));
        Ok(())
    }

    #[cfg_attr(not(feature = "gui"), allow(dead_code))]
    fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
        self.engine.send(EngineCommand::SetBpm(bpm));
    }

    /// Stand-in for a control key on the hardware keyboard.
    #[cfg_attr(not(feature = "gui"), allow(dead_code))]
    fn key(&self, note: u8, down: bool) {
        let channel = self.control_channel;
        let event = if down {
            MidiEvent::NoteOn { channel, note }
        } else {
            MidiEvent::NoteOff { channel, note }
        };
        self.engine.send(EngineCommand::Midi(event));
    }

    fn view_mut(&mut self, family: Family) -> &mut FamilyView {
        match family {
            Family::Drum => &mut self.drum,
            Family::Synth => &mut self.synth,
        }
    }

    fn handle_playback_events(&mut self) -> Vec<PlaybackEvent> {
        let events = self.engine.poll_events();

        for event in &events {
            match event {
                PlaybackEvent::NoteOn { channel, note, .. } => {
                    if let Some(audio) = self.audio.as_mut() {
                        audio.note_on(*channel, *note);
                    }
                }
                PlaybackEvent::NoteOff { channel, note, .. } => {
                    if let Some(audio) = self.audio.as_mut() {
                        audio.note_off(*channel, *note);
                    }
                }
                PlaybackEvent::Step(view) => {
                    let shown = self.view_mut(view.family);
                    shown.playing = true;
                    shown.pattern = view.pattern;
                    shown.step = view.step;
                    shown.pose = view.pose.clone();
                }
                PlaybackEvent::Idle(family) => {
                    *self.view_mut(*family) = FamilyView::default();
                }
                PlaybackEvent::Tempo { bpm, .. } => self.bpm = *bpm,
                PlaybackEvent::Stopped => {
                    if let Some(audio) = self.audio.as_mut() {
                        audio.silence();
                    }
                }
                PlaybackEvent::Started => {}
            }
        }
        events
    }
}

#[cfg(feature = "gui")]
fn main() -> Result<()> {
    let args = parse_args();
    init_logging(args.verbose);
    if args.list_ports {
        print_ports();
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let session = Session::open(&config)?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 420.0])
            .with_title("FNGR - Finger Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "FNGR",
        options,
        Box::new(|_cc| Ok(Box::new(SequencerApp::new(session)))),
    )
    .map_err(|e| anyhow::anyhow!("window failed: {}", e))
}

#[cfg(not(feature = "gui"))]
fn main() -> Result<()> {
    use anyhow::Context;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let args = parse_args();
    init_logging(args.verbose);
    if args.list_ports {
        print_ports();
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let mut session = Session::open(&config)?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("installing interrupt handler")?;
    log::info!(
        "running headless, play the control keys on channel {} (ctrl-c to quit)",
        session.control_channel
    );

    while running.load(Ordering::SeqCst) {
        for event in session.handle_playback_events() {
            if let PlaybackEvent::Step(view) = event {
                let shown = match view.family {
                    Family::Drum => &session.drum,
                    Family::Synth => &session.synth,
                };
                log::info!("{}", shown.describe(view.family));
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    // Stopping the engine sends note-offs for anything still sounding.
    log::info!("shutting down");
    drop(session);
    Ok(())
}

#[cfg(feature = "gui")]
struct SequencerApp {
    session: Session,

    // UI state
    available_inputs: Vec<String>,
    available_outputs: Vec<String>,
    keys_down: [bool; WHITE_KEYS.len()],
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(session: Session) -> Self {
        Self {
            session,
            available_inputs: MidiInputDevice::available_ports(),
            available_outputs: MidiOutputDevice::available_ports(),
            keys_down: [false; WHITE_KEYS.len()],
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.session.handle_playback_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("FNGR - Finger Sequencer");
            ui.add_space(10.0);

            // MIDI port selection
            let mut input_changed = None;
            let mut output_changed = None;
            ui.horizontal(|ui| {
                ui.label("MIDI In:");
                egui::ComboBox::from_id_source("midi-in")
                    .selected_text(port_label(&names(self.session.input.port_names())))
                    .show_ui(ui, |ui| {
                        if ui.selectable_label(false, "All ports").clicked() {
                            input_changed = Some(None);
                        }
                        for (i, name) in self.available_inputs.iter().enumerate() {
                            if ui.selectable_label(false, name).clicked() {
                                input_changed = Some(Some(i));
                            }
                        }
                    });

                ui.add_space(20.0);

                ui.label("MIDI Out:");
                egui::ComboBox::from_id_source("midi-out")
                    .selected_text(port_label(&self.session.output_names))
                    .show_ui(ui, |ui| {
                        if ui.selectable_label(false, "All ports").clicked() {
                            output_changed = Some(None);
                        }
                        for (i, name) in self.available_outputs.iter().enumerate() {
                            if ui.selectable_label(false, name).clicked() {
                                output_changed = Some(Some(i));
                            }
                        }
                    });
            });

            match input_changed {
                Some(Some(index)) => {
                    if let Err(e) = self.session.connect_input(index) {
                        log::warn!(target: "midi", "{:#}", e);
                    }
                }
                Some(None) => self.session.connect_all_inputs(),
                None => {}
            }
            if let Some(index) = output_changed {
                if let Err(e) = self.session.connect_output(index) {
                    log::warn!(target: "midi", "{:#}", e);
                }
            }

            ui.add_space(10.0);

            ui.horizontal(|ui| {
                ui.label("BPM:");
                let mut bpm = self.session.bpm;
                if ui
                    .add(egui::Slider::new(&mut bpm, 40.0..=240.0).step_by(1.0))
                    .changed()
                {
                    self.session.set_bpm(bpm);
                }
            });

            ui.add_space(20.0);

            ui.monospace(self.session.drum.describe(Family::Drum));
            ui.monospace(self.session.synth.describe(Family::Synth));

            ui.add_space(20.0);

            // Control keys: hold to play, like the hardware keyboard
            ui.label("Pattern keys (drum | synth):");
            ui.horizontal(|ui| {
                for (i, &note) in WHITE_KEYS.iter().enumerate() {
                    if i == WHITE_KEYS.len() / 2 {
                        ui.separator();
                    }
                    let button = egui::Button::new(midi_note_name(note))
                        .min_size(egui::vec2(40.0, 80.0))
                        .fill(if self.keys_down[i] {
                            egui::Color32::from_rgb(100, 200, 100)
                        } else {
                            egui::Color32::from_rgb(60, 60, 60)
                        });
                    let down = ui.add(button).is_pointer_button_down_on();
                    if down != self.keys_down[i] {
                        self.keys_down[i] = down;
                        self.session.key(note, down);
                    }
                }
            });

            // Info
            ui.separator();
            if self.session.output_names.is_empty() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No MIDI output connected - visual feedback only",
                );
            }
        });
    }
}
