/// Playback engine - frame-driven beat scheduling and the host thread that drives it
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::pattern::{PatternBank, Step};
use super::voice::DrumPose;
use super::{Channels, Family, Sequencer, Track};
use crate::midi::{MidiCommand, MidiEvent, MidiTransport, FULL_VELOCITY};

/// Everything the sequencer asks the outside world to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Stopped,
    /// `at` is the deadline the note belongs to; `None` means now.
    NoteOn {
        family: Family,
        channel: u8,
        note: u8,
        velocity: u8,
        at: Option<f64>,
    },
    NoteOff {
        family: Family,
        channel: u8,
        note: u8,
        velocity: u8,
        at: Option<f64>,
    },
    Step(StepView),
    /// Return the family's figure to its resting pose.
    Idle(Family),
    Tempo {
        bpm: f64,
        step_duration: f64,
    },
}

/// Visual projection of one emitted step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepView {
    pub family: Family,
    pub pattern: usize,
    pub step: usize,
    /// `None` for a rest.
    pub pose: Option<Pose>,
    pub at: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pose {
    Drum(DrumPose),
    Synth { notes: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextFrame {
    Continue,
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub events: Vec<PlaybackEvent>,
    pub next: NextFrame,
}

/// Deadline bookkeeping. Deadline n of a run is `anchor + n * step`, so
/// frame jitter never feeds back into step times.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    anchor: Option<f64>,
    emitted: u64,
    last: Option<f64>,
    note_due: bool,
    lookahead: f64,
}

impl Schedule {
    pub(crate) fn new(lookahead: f64) -> Self {
        Self {
            anchor: None,
            emitted: 0,
            last: None,
            note_due: false,
            lookahead,
        }
    }

    /// Forget all deadlines and make the next tick play immediately.
    pub(crate) fn restart(&mut self) {
        self.reset();
        self.note_due = true;
    }

    pub(crate) fn reset(&mut self) {
        self.anchor = None;
        self.emitted = 0;
        self.last = None;
        self.note_due = false;
    }

    /// Count future deadlines from the last emitted one.
    pub(crate) fn rebase(&mut self) {
        if let Some(last) = self.last {
            self.anchor = Some(last);
            self.emitted = 0;
        }
    }

    fn take_deadline(&mut self, now: f64, step: f64) -> f64 {
        let deadline = match self.anchor {
            Some(anchor) => {
                self.emitted += 1;
                anchor + self.emitted as f64 * step
            }
            None => {
                self.anchor = Some(now);
                self.emitted = 0;
                now
            }
        };
        self.last = Some(deadline);
        self.note_due = false;
        deadline
    }

    fn next_deadline(&self, step: f64) -> Option<f64> {
        self.anchor
            .map(|anchor| anchor + (self.emitted + 1) as f64 * step)
    }

    /// Whether the pending step may go out at `now`. The first step of a run
    /// has no deadline yet and always may.
    fn in_window(&self, now: f64, step: f64) -> bool {
        self.next_deadline(step)
            .map_or(true, |next| next - now <= self.lookahead)
    }
}

impl Sequencer {
    /// Run one frame at timestamp `now` (seconds on any monotonic clock).
    ///
    /// A step becomes due once its deadline is within the lookahead window
    /// and is emitted on the following frame, tagged with its exact
    /// deadline.
    pub fn tick(&mut self, now: f64) -> Tick {
        let mut events = Vec::new();

        if !self.playing {
            self.schedule.reset();
            for family in Family::ALL {
                events.push(PlaybackEvent::Idle(family));
            }
            self.frames_requested = false;
            return Tick {
                events,
                next: NextFrame::Halt,
            };
        }

        let step = self.tempo.step_duration();

        // A tempo drop can push a due step's deadline back out of the window.
        if self.schedule.note_due && self.schedule.in_window(now, step) {
            let deadline = self.schedule.take_deadline(now, step);
            emit_step(&self.bank, &self.channels, &mut self.drum, deadline, &mut events);
            emit_step(&self.bank, &self.channels, &mut self.synth, deadline, &mut events);
        }

        if let Some(next) = self.schedule.next_deadline(step) {
            if !self.schedule.note_due && next - now <= self.schedule.lookahead {
                self.schedule.note_due = true;
                for track in [&mut self.drum, &mut self.synth] {
                    let len = self.bank.pattern(track.family, track.playhead.pattern).len();
                    track.playhead.step = (track.playhead.step + 1) % len;
                }
            }
        }

        Tick {
            events,
            next: NextFrame::Continue,
        }
    }

    /// Deadline of the most recently emitted step.
    pub fn last_deadline(&self) -> Option<f64> {
        self.schedule.last
    }
}

fn emit_step(
    bank: &PatternBank,
    channels: &Channels,
    track: &mut Track,
    deadline: f64,
    events: &mut Vec<PlaybackEvent>,
) {
    if !track.playing {
        return;
    }

    let family = track.family;
    let pattern = bank.pattern(family, track.playhead.pattern);
    let index = track.playhead.step % pattern.len();
    let step = pattern.step(index);

    // Off before on, even when the same notes repeat.
    track.flush(Some(deadline), events);

    let channel = channels.output(family);
    for note in step.midi_notes() {
        events.push(PlaybackEvent::NoteOn {
            family,
            channel,
            note,
            velocity: FULL_VELOCITY,
            at: Some(deadline),
        });
        track.active.push(channel, note);
    }

    let pose = match (family, step) {
        (_, Step::Empty) => None,
        (Family::Drum, Step::One(a)) => Some(Pose::Drum(DrumPose::single(a))),
        (Family::Drum, Step::Two(a, b)) => Some(Pose::Drum(DrumPose::pair(a, b))),
        (Family::Synth, _) => Some(Pose::Synth {
            notes: step.midi_notes().collect(),
        }),
    };
    events.push(PlaybackEvent::Step(StepView {
        family,
        pattern: track.playhead.pattern,
        step: index,
        pose,
        at: deadline,
    }));
}

/// Messages into the engine thread.
pub enum EngineCommand {
    Midi(MidiEvent),
    SetBpm(f64),
    SetChannels(Channels),
    SetTransport(Box<dyn MidiTransport + Send>),
}

/// Owns a [`Sequencer`] on its own thread and calls `tick` once per frame.
///
/// All access to the sequencer goes through the command channel, so MIDI
/// callbacks and the UI never race the scheduler.
pub struct PlaybackEngine {
    sender: Sender<EngineCommand>,
    receiver: Receiver<PlaybackEvent>,
    is_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn start(
        sequencer: Sequencer,
        transport: Box<dyn MidiTransport + Send>,
        frame_rate: f64,
    ) -> Self {
        let (sender, commands) = channel();
        let (events, receiver) = channel();
        let is_running = Arc::new(AtomicBool::new(true));
        let frame = Duration::from_secs_f64(1.0 / frame_rate.clamp(1.0, 1000.0));

        let running = Arc::clone(&is_running);
        let handle = thread::spawn(move || {
            let mut host = Host {
                sequencer,
                transport,
                events,
            };
            host.run(commands, &running, frame);
        });

        log::info!(target: "engine", "engine started at {:.1} fps", 1.0 / frame.as_secs_f64());
        Self {
            sender,
            receiver,
            is_running,
            handle: Some(handle),
        }
    }

    /// Handle for other threads (MIDI input callbacks) to feed the engine.
    pub fn sender(&self) -> Sender<EngineCommand> {
        self.sender.clone()
    }

    pub fn send(&self, command: EngineCommand) {
        if self.sender.send(command).is_err() {
            log::warn!(target: "engine", "engine thread is gone");
        }
    }

    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!(target: "engine", "engine thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Host {
    sequencer: Sequencer,
    transport: Box<dyn MidiTransport + Send>,
    events: Sender<PlaybackEvent>,
}

impl Host {
    fn run(&mut self, commands: Receiver<EngineCommand>, running: &AtomicBool, frame: Duration) {
        let clock = Instant::now();
        let mut next_frame = clock;

        while running.load(Ordering::Acquire) {
            loop {
                match commands.try_recv() {
                    Ok(command) => self.apply(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        running.store(false, Ordering::Release);
                        break;
                    }
                }
            }

            if self.sequencer.wants_frame() {
                let tick = self.sequencer.tick(clock.elapsed().as_secs_f64());
                self.dispatch(tick.events);
            }

            next_frame += frame;
            let now = Instant::now();
            if next_frame > now {
                thread::sleep(next_frame - now);
            } else {
                next_frame = now;
            }
        }

        let events = self.sequencer.all_notes_off();
        self.dispatch(events);
        log::info!(target: "engine", "engine stopped");
    }

    fn apply(&mut self, command: EngineCommand) {
        let events = match command {
            EngineCommand::Midi(event) => {
                log::trace!(target: "engine", "midi in {:?}", event);
                self.sequencer.handle_midi(event)
            }
            EngineCommand::SetBpm(bpm) => self.sequencer.set_bpm(bpm),
            EngineCommand::SetChannels(channels) => {
                self.sequencer.set_channels(channels);
                Vec::new()
            }
            EngineCommand::SetTransport(transport) => {
                // Note-offs go to the port that got the note-ons.
                let events = self.sequencer.flush_notes();
                self.dispatch(events);
                self.transport = transport;
                Vec::new()
            }
        };
        self.dispatch(events);
    }

    fn dispatch(&mut self, events: Vec<PlaybackEvent>) {
        for event in events {
            match event {
                PlaybackEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                    ..
                } => self
                    .transport
                    .send(channel, MidiCommand::NoteOn, note, velocity),
                PlaybackEvent::NoteOff {
                    channel,
                    note,
                    velocity,
                    ..
                } => self
                    .transport
                    .send(channel, MidiCommand::NoteOff, note, velocity),
                _ => {}
            }
            // The UI may have gone away; playback carries on regardless.
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::NullTransport;
    use std::sync::Mutex;

    const FRAME: f64 = 1.0 / 60.0;

    fn steps(events: &[PlaybackEvent], family: Family) -> Vec<StepView> {
        events
            .iter()
            .filter_map(|e| match e {
                PlaybackEvent::Step(view) if view.family == family => Some(view.clone()),
                _ => None,
            })
            .collect()
    }

    /// Run frames until `until`, collecting every event.
    fn run(seq: &mut Sequencer, from: f64, until: f64) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        let mut now = from;
        while now < until {
            events.extend(seq.tick(now).events);
            now += FRAME;
        }
        events
    }

    #[test]
    fn test_first_tick_plays_step_zero_now() {
        let mut seq = Sequencer::default();
        seq.press(Family::Drum, 0);
        let tick = seq.tick(5.0);
        assert_eq!(tick.next, NextFrame::Continue);
        assert_eq!(
            tick.events[0],
            PlaybackEvent::NoteOn {
                family: Family::Drum,
                channel: 1,
                note: 53,
                velocity: 127,
                at: Some(5.0)
            }
        );
        let views = steps(&tick.events, Family::Drum);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].step, 0);
        assert_eq!(views[0].at, 5.0);
        assert!(steps(&tick.events, Family::Synth).is_empty());
    }

    #[test]
    fn test_steps_land_on_deadlines() {
        let mut seq = Sequencer::default();
        seq.press(Family::Synth, 0);
        let events = run(&mut seq, 0.0, 0.95);
        let views = steps(&events, Family::Synth);
        assert_eq!(views.len(), 8);
        for (n, view) in views.iter().enumerate() {
            assert!((view.at - n as f64 * 0.125).abs() < 1e-9);
            assert_eq!(view.step, n % 8);
        }
    }

    #[test]
    fn test_step_prepared_within_lookahead() {
        let mut seq = Sequencer::default();
        seq.press(Family::Drum, 0);
        seq.tick(0.0);
        // Next deadline 0.125; due once within two frames.
        assert!(seq.tick(0.05).events.is_empty());
        assert!(seq.tick(0.125 - 2.0 * FRAME - 0.001).events.is_empty());
        assert_eq!(seq.playhead(Family::Drum).step, 0);
        assert!(seq.tick(0.125 - 2.0 * FRAME + 0.001).events.is_empty());
        assert_eq!(seq.playhead(Family::Drum).step, 1);
        let tick = seq.tick(0.125 - FRAME);
        let views = steps(&tick.events, Family::Drum);
        assert_eq!(views[0].step, 1);
        assert_eq!(views[0].at, 0.125);
    }

    #[test]
    fn test_stop_halts_after_idle_reset() {
        let mut seq = Sequencer::default();
        seq.press(Family::Drum, 0);
        seq.tick(0.0);
        seq.release(Family::Drum, 0);
        let tick = seq.tick(FRAME);
        assert_eq!(tick.next, NextFrame::Halt);
        assert_eq!(
            tick.events,
            vec![
                PlaybackEvent::Idle(Family::Drum),
                PlaybackEvent::Idle(Family::Synth)
            ]
        );
        assert!(!seq.wants_frame());
        assert_eq!(seq.last_deadline(), None);
    }

    #[test]
    fn test_restart_resets_playheads() {
        let mut seq = Sequencer::default();
        seq.press(Family::Drum, 0);
        run(&mut seq, 0.0, 0.5);
        assert_ne!(seq.playhead(Family::Drum).step, 0);
        seq.release(Family::Drum, 0);
        seq.tick(0.5);
        seq.press(Family::Synth, 2);
        assert_eq!(seq.playhead(Family::Drum).step, 0);
        let tick = seq.tick(10.0);
        let views = steps(&tick.events, Family::Synth);
        assert_eq!(views[0].step, 0);
        assert_eq!(views[0].at, 10.0);
    }

    #[test]
    fn test_family_joins_in_lock_step() {
        let mut seq = Sequencer::default();
        seq.press(Family::Drum, 0);
        run(&mut seq, 0.0, 0.3);
        let drum_step = seq.playhead(Family::Drum).step;
        seq.press(Family::Synth, 0);
        assert_eq!(seq.playhead(Family::Synth).step, drum_step);
    }

    #[test]
    fn test_tempo_change_rebases_on_last_deadline() {
        let mut seq = Sequencer::default();
        seq.press(Family::Drum, 0);
        let events = run(&mut seq, 0.0, 0.3);
        let last = steps(&events, Family::Drum).last().unwrap().at;
        assert_eq!(last, 0.25);
        assert_eq!(seq.last_deadline(), Some(0.25));

        seq.set_bpm(60.0);
        let events = run(&mut seq, 0.3, 1.3);
        let times = steps(&events, Family::Drum)
            .iter()
            .map(|v| v.at)
            .collect::<Vec<_>>();
        assert_eq!(times, vec![0.5, 0.75, 1.0, 1.25]);
    }

    #[test]
    fn test_tempo_drop_holds_due_step() {
        let mut seq = Sequencer::default().with_bpm(240.0);
        seq.press(Family::Drum, 0);
        seq.tick(0.0);
        // 0.0625 is within two frames of 0.03, so step 1 is now due.
        assert!(seq.tick(0.03).events.is_empty());
        assert_eq!(seq.playhead(Family::Drum).step, 1);

        seq.set_bpm(40.0);
        let mut now = 0.05;
        let view = loop {
            if let Some(view) = steps(&seq.tick(now).events, Family::Drum).pop() {
                break view;
            }
            assert_eq!(seq.playhead(Family::Drum).step, 1);
            now += FRAME;
            assert!(now < 1.0, "due step never played");
        };
        assert_eq!(view.step, 1);
        assert!((view.at - 0.375).abs() < 1e-9);
        assert!(view.at - now <= 2.0 * FRAME + 1e-9, "played {} early", view.at - now);
    }

    #[test]
    fn test_synth_pose_lists_notes() {
        let mut seq = Sequencer::default();
        seq.press(Family::Synth, 5);
        let tick = seq.tick(0.0);
        let view = &steps(&tick.events, Family::Synth)[0];
        assert_eq!(view.pose, Some(Pose::Synth { notes: vec![75] }));
        assert_eq!(view.pattern, 5);
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(u8, MidiCommand, u8)>>>);

    impl MidiTransport for Recorder {
        fn send(&mut self, channel: u8, command: MidiCommand, note: u8, _velocity: u8) {
            self.0.lock().unwrap().push((channel, command, note));
        }
    }

    #[test]
    fn test_engine_plays_and_releases() {
        let recorder = Recorder::default();
        let mut engine = PlaybackEngine::start(
            Sequencer::default(),
            Box::new(NullTransport),
            120.0,
        );
        engine.send(EngineCommand::SetTransport(Box::new(recorder.clone())));
        engine.send(EngineCommand::Midi(MidiEvent::NoteOn {
            channel: 14,
            note: 53,
        }));

        let deadline = Instant::now() + Duration::from_secs(2);
        while recorder.0.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        engine.stop();
        assert!(!engine.is_running());

        let sent = recorder.0.lock().unwrap().clone();
        assert_eq!(sent.first(), Some(&(1, MidiCommand::NoteOn, 53)));
        assert_eq!(sent.last(), Some(&(1, MidiCommand::NoteOff, 53)));

        let events = engine.poll_events();
        assert_eq!(events.first(), Some(&PlaybackEvent::Started));
    }

    #[test]
    fn test_dropping_engine_releases_sounding_notes() {
        let recorder = Recorder::default();
        let engine = PlaybackEngine::start(Sequencer::default(), Box::new(recorder.clone()), 120.0);
        engine.send(EngineCommand::Midi(MidiEvent::NoteOn {
            channel: 14,
            note: 67,
        }));
        wait_for(&recorder, |sent| !sent.is_empty());
        drop(engine);

        let sent = recorder.0.lock().unwrap().clone();
        assert_eq!(sent.first(), Some(&(8, MidiCommand::NoteOn, 67)));
        assert_eq!(sent.last(), Some(&(8, MidiCommand::NoteOff, 67)));
    }

    fn wait_for(recorder: &Recorder, done: impl Fn(&[(u8, MidiCommand, u8)]) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(recorder.0.lock().unwrap().as_slice()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_transport_swap_keeps_held_pattern_playing() {
        let first = Recorder::default();
        let second = Recorder::default();
        let mut engine =
            PlaybackEngine::start(Sequencer::default(), Box::new(first.clone()), 120.0);
        engine.send(EngineCommand::Midi(MidiEvent::NoteOn {
            channel: 14,
            note: 53,
        }));
        wait_for(&first, |sent| !sent.is_empty());

        engine.send(EngineCommand::SetTransport(Box::new(second.clone())));
        // Drum pattern 0 hits again half a second in.
        wait_for(&second, |sent| {
            sent.contains(&(1, MidiCommand::NoteOn, 53))
        });
        engine.send(EngineCommand::Midi(MidiEvent::NoteOff {
            channel: 14,
            note: 53,
        }));
        engine.stop();

        let old = first.0.lock().unwrap().clone();
        assert_eq!(
            old,
            vec![(1, MidiCommand::NoteOn, 53), (1, MidiCommand::NoteOff, 53)]
        );
        let new = second.0.lock().unwrap().clone();
        assert_eq!(new.first(), Some(&(1, MidiCommand::NoteOn, 53)));
        assert_eq!(new.last(), Some(&(1, MidiCommand::NoteOff, 53)));

        let events = engine.poll_events();
        let stops = events
            .iter()
            .filter(|e| **e == PlaybackEvent::Stopped)
            .count();
        assert_eq!(stops, 1);
    }
}
