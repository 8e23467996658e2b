use std::collections::HashMap;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fngr::sequencer::pattern::PATTERNS_PER_FAMILY;
use fngr::{
    DrumPose, Family, MidiEvent, PatternBank, PlaybackEvent, Pose, Sequencer, Step, StepView,
};

const FRAME: f64 = 1.0 / 60.0;
const CONTROL: u8 = 14;

fn views(events: &[PlaybackEvent], family: Family) -> Vec<StepView> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::Step(view) if view.family == family => Some(view.clone()),
            _ => None,
        })
        .collect()
}

/// `(is_on, note)` for one family's MIDI events, in emission order.
fn midi(events: &[PlaybackEvent], family: Family) -> Vec<(bool, u8)> {
    events
        .iter()
        .filter_map(|e| match *e {
            PlaybackEvent::NoteOn { family: f, note, .. } if f == family => Some((true, note)),
            PlaybackEvent::NoteOff { family: f, note, .. } if f == family => Some((false, note)),
            _ => None,
        })
        .collect()
}

fn notes(step: Step) -> Vec<u8> {
    step.midi_notes().collect()
}

#[test]
fn test_deadlines_do_not_drift_under_jitter() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut seq = Sequencer::default();
    seq.press(Family::Synth, 0);
    let step = seq.tempo().step_duration();

    let start = 3.0;
    let mut now = start;
    let mut emitted = Vec::new();
    while emitted.len() < 1000 {
        let tick = seq.tick(now);
        for view in views(&tick.events, Family::Synth) {
            emitted.push((view.at, now));
        }
        now += FRAME + rng.gen_range(-0.004..=0.004);
    }

    for (n, &(deadline, played_at)) in emitted.iter().enumerate() {
        let expected = start + n as f64 * step;
        assert!(
            (deadline - expected).abs() < 1e-9,
            "step {} deadline {} expected {}",
            n,
            deadline,
            expected
        );
        assert!(
            (played_at - deadline).abs() <= FRAME + 0.004 + 1e-9,
            "step {} emitted at {} for deadline {}",
            n,
            played_at,
            deadline
        );
    }
}

#[test]
fn test_note_off_precedes_note_on() {
    let bank = PatternBank::builtin();
    let pattern = bank.pattern(Family::Drum, 3).clone();
    let mut seq = Sequencer::new(bank);
    seq.press(Family::Drum, 3);

    let mut previous: Vec<u8> = Vec::new();
    let mut checked = 0;
    let mut now = 0.0;
    while checked < 2 * pattern.len() {
        let tick = seq.tick(now);
        now += FRAME;
        let Some(view) = views(&tick.events, Family::Drum).pop() else {
            continue;
        };
        let current = notes(pattern.step(view.step));
        let expected = previous
            .iter()
            .map(|&n| (false, n))
            .chain(current.iter().map(|&n| (true, n)))
            .collect::<Vec<_>>();
        assert_eq!(midi(&tick.events, Family::Drum), expected, "step {}", view.step);
        previous = current;
        checked += 1;
    }
}

#[test]
fn test_held_key_fallback_over_midi() {
    let mut seq = Sequencer::default();
    // White keys 57 and 62 select drum patterns 2 and 5.
    seq.handle_midi(MidiEvent::NoteOn { channel: CONTROL, note: 57 });
    seq.handle_midi(MidiEvent::NoteOn { channel: CONTROL, note: 62 });
    assert_eq!(seq.playhead(Family::Drum).pattern, 5);

    seq.handle_midi(MidiEvent::NoteOff { channel: CONTROL, note: 62 });
    assert_eq!(seq.playhead(Family::Drum).pattern, 2);
    assert!(seq.family_playing(Family::Drum));
    assert!(seq.is_playing());
}

#[test]
fn test_global_stop_flushes_each_note_once() {
    let mut seq = Sequencer::default();
    seq.press(Family::Drum, 1);
    seq.press(Family::Synth, 3);
    seq.press(Family::Synth, 5);

    let mut events = seq.tick(0.0).events;
    assert_eq!(midi(&events, Family::Drum), vec![(true, 61), (true, 53)]);
    assert_eq!(midi(&events, Family::Synth), vec![(true, 75)]);

    events = seq.release(Family::Drum, 1);
    events.extend(seq.release(Family::Synth, 5));
    assert!(seq.is_playing());
    events.extend(seq.release(Family::Synth, 3));
    assert!(!seq.is_playing());
    let halt = seq.tick(FRAME);
    events.extend(halt.events);

    let mut offs = events
        .iter()
        .filter_map(|e| match *e {
            PlaybackEvent::NoteOff { channel, note, .. } => Some((channel, note)),
            PlaybackEvent::NoteOn { .. } => panic!("note-on after release"),
            _ => None,
        })
        .collect::<Vec<_>>();
    offs.sort();
    assert_eq!(offs, vec![(1, 53), (1, 61), (8, 75)]);
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == PlaybackEvent::Stopped)
            .count(),
        1
    );
}

#[test]
fn test_drum_reference_wraps_to_same_pose() -> Result<()> {
    // 65 is reference 12, one table length past the kick at 53.
    let rows = vec!["[[53], [65], [61, 55], [73, 67]]"; PATTERNS_PER_FAMILY].join(", ");
    let bank = PatternBank::from_toml(&format!("drum = [{rows}]\nsynth = [{rows}]\n"))?;
    let mut seq = Sequencer::new(bank);
    seq.press(Family::Drum, 0);

    let mut shown = Vec::new();
    let mut now = 0.0;
    while shown.len() < 4 {
        shown.extend(views(&seq.tick(now).events, Family::Drum));
        now += FRAME;
    }
    assert_eq!(shown[0].pose, shown[1].pose);
    assert_eq!(shown[2].pose, shown[3].pose);
    assert_eq!(shown[0].pose, Some(Pose::Drum(DrumPose::single(0))));
    Ok(())
}

#[test]
fn test_empty_step_only_releases() {
    let mut seq = Sequencer::default();
    seq.press(Family::Drum, 0);
    seq.tick(0.0);

    let mut now = FRAME;
    let events = loop {
        let tick = seq.tick(now);
        now += FRAME;
        if !views(&tick.events, Family::Drum).is_empty() {
            break tick.events;
        }
    };
    assert_eq!(midi(&events, Family::Drum), vec![(false, 53)]);
    let view = &views(&events, Family::Drum)[0];
    assert_eq!(view.step, 1);
    assert_eq!(view.pose, None);
    assert!(seq.active_notes(Family::Drum).is_empty());
}

#[test]
fn test_switching_pattern_lengths_stays_in_range() {
    let mut rng = StdRng::seed_from_u64(42);
    let bank = PatternBank::builtin();
    let mut seq = Sequencer::new(bank.clone());
    // Synth 4 has 31 steps, synth 5 has 6.
    seq.press(Family::Synth, 4);

    let mut now = 0.0;
    let mut held_short = false;
    for _ in 0..3000 {
        if rng.gen_bool(0.05) {
            if held_short {
                seq.release(Family::Synth, 5);
            } else {
                seq.press(Family::Synth, 5);
            }
            held_short = !held_short;
        }
        for view in views(&seq.tick(now).events, Family::Synth) {
            let len = bank.pattern(Family::Synth, view.pattern).len();
            assert!(view.step < len, "step {} of {}-step pattern", view.step, len);
            assert_eq!(view.pattern, if held_short { 5 } else { 4 });
        }
        now += FRAME;
    }
}

#[test]
fn test_random_key_mashing_keeps_notes_balanced() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut seq = Sequencer::default().with_bpm(240.0);
    let keys = [53u8, 55, 57, 59, 60, 62, 64, 65, 67, 69, 71, 72, 74, 76];
    let mut down: Vec<u8> = Vec::new();
    let mut sounding: HashMap<(u8, u8), bool> = HashMap::new();

    let mut check = |events: Vec<PlaybackEvent>| {
        for event in events {
            match event {
                PlaybackEvent::NoteOn { channel, note, .. } => {
                    let was = sounding.insert((channel, note), true).unwrap_or(false);
                    assert!(!was, "note {} on twice without off", note);
                }
                PlaybackEvent::NoteOff { channel, note, .. } => {
                    let was = sounding.insert((channel, note), false).unwrap_or(false);
                    assert!(was, "note {} off without on", note);
                }
                _ => {}
            }
        }
    };

    let mut now = 0.0;
    for _ in 0..5000 {
        if rng.gen_bool(0.1) {
            let key = keys[rng.gen_range(0..keys.len())];
            if down.contains(&key) && rng.gen_bool(0.5) {
                down.retain(|&k| k != key);
                check(seq.handle_midi(MidiEvent::NoteOff { channel: CONTROL, note: key }));
            } else if !down.contains(&key) {
                down.push(key);
                check(seq.handle_midi(MidiEvent::NoteOn { channel: CONTROL, note: key }));
            }
        }
        if seq.wants_frame() {
            check(seq.tick(now).events);
        }
        now += FRAME;
    }

    for key in down.drain(..) {
        check(seq.handle_midi(MidiEvent::NoteOff { channel: CONTROL, note: key }));
    }
    check(seq.tick(now).events);

    assert!(!seq.is_playing());
    assert!(!seq.wants_frame());
    assert!(sounding.values().all(|on| !on));
}
