/// Pattern store: the read-only drum and synth step tables
use std::fmt;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use super::Family;

/// MIDI note of reference 0 (F3, the lowest control key).
pub const NOTE_BASE: u8 = 53;

/// Patterns selectable per family: one octave half of the control keys.
pub const PATTERNS_PER_FAMILY: usize = 7;

/// One slot of a pattern. Note references are offsets from [`NOTE_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Empty,
    One(u8),
    Two(u8, u8),
}

impl Step {
    /// Build a step from absolute MIDI note numbers.
    pub fn from_midi(notes: &[u8]) -> Result<Step> {
        let to_ref = |note: u8| {
            if (NOTE_BASE..=127).contains(&note) {
                Ok(note - NOTE_BASE)
            } else {
                Err(anyhow!("note {} outside {}..=127", note, NOTE_BASE))
            }
        };
        match *notes {
            [] => Ok(Step::Empty),
            [a] => Ok(Step::One(to_ref(a)?)),
            [a, b] => Ok(Step::Two(to_ref(a)?, to_ref(b)?)),
            _ => bail!("a step holds at most 2 notes, found {}", notes.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Step::Empty)
    }

    /// Note references in play order.
    pub fn refs(&self) -> impl Iterator<Item = u8> {
        let (first, second) = match *self {
            Step::Empty => (None, None),
            Step::One(a) => (Some(a), None),
            Step::Two(a, b) => (Some(a), Some(b)),
        };
        first.into_iter().chain(second)
    }

    /// Absolute MIDI note numbers in play order.
    pub fn midi_notes(&self) -> impl Iterator<Item = u8> {
        self.refs().map(midi_note)
    }
}

pub fn midi_note(reference: u8) -> u8 {
    NOTE_BASE.saturating_add(reference)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<Step>,
}

impl Pattern {
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            bail!("a pattern needs at least one step");
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`, wrapped to this pattern's own length.
    pub fn step(&self, index: usize) -> Step {
        self.steps[index % self.steps.len()]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternBank {
    drum: Vec<Pattern>,
    synth: Vec<Pattern>,
}

#[derive(Deserialize)]
struct PatternFile {
    drum: Vec<Vec<Vec<u8>>>,
    synth: Vec<Vec<Vec<u8>>>,
}

impl PatternBank {
    pub fn new(drum: Vec<Pattern>, synth: Vec<Pattern>) -> Result<Self> {
        for (family, table) in [(Family::Drum, &drum), (Family::Synth, &synth)] {
            if table.len() != PATTERNS_PER_FAMILY {
                bail!(
                    "{} table needs {} patterns, found {}",
                    family,
                    PATTERNS_PER_FAMILY,
                    table.len()
                );
            }
        }
        Ok(Self { drum, synth })
    }

    /// The factory patterns.
    pub fn builtin() -> Self {
        let table = |raw: &[&[Step]]| -> Vec<Pattern> {
            raw.iter()
                .map(|steps| Pattern {
                    steps: steps.to_vec(),
                })
                .collect()
        };
        Self {
            drum: table(&DRUM_PATTERNS),
            synth: table(&SYNTH_PATTERNS),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading patterns file {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("in {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: PatternFile = toml::from_str(contents).context("malformed patterns file")?;
        let table = |family: Family, raw: Vec<Vec<Vec<u8>>>| -> Result<Vec<Pattern>> {
            raw.iter()
                .enumerate()
                .map(|(p, steps)| {
                    let steps = steps
                        .iter()
                        .enumerate()
                        .map(|(s, notes)| {
                            Step::from_midi(notes)
                                .with_context(|| format!("{} pattern {} step {}", family, p, s))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Pattern::new(steps).with_context(|| format!("{} pattern {}", family, p))
                })
                .collect()
        };
        Self::new(
            table(Family::Drum, file.drum)?,
            table(Family::Synth, file.synth)?,
        )
    }

    /// Pattern `index` of `family`. An index outside the table is a
    /// programming error and panics.
    pub fn pattern(&self, family: Family, index: usize) -> &Pattern {
        let table = match family {
            Family::Drum => &self.drum,
            Family::Synth => &self.synth,
        };
        assert!(
            index < table.len(),
            "{} pattern index {} out of range (table holds {})",
            family,
            index,
            table.len()
        );
        &table[index]
    }
}

impl Default for PatternBank {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Step::Empty => write!(f, "-"),
            Step::One(a) => write!(f, "{}", midi_note(a)),
            Step::Two(a, b) => write!(f, "{}+{}", midi_note(a), midi_note(b)),
        }
    }
}

const REST: Step = Step::Empty;

const fn one(a: u8) -> Step {
    Step::One(a - NOTE_BASE)
}

const fn two(a: u8, b: u8) -> Step {
    Step::Two(a - NOTE_BASE, b - NOTE_BASE)
}

#[rustfmt::skip]
static DRUM_PATTERNS: [&[Step]; PATTERNS_PER_FAMILY] = [
    // F
    &[
        one(53), REST, REST, REST, one(53), REST, REST, REST,
        one(53), REST, REST, REST, one(53), REST, REST, REST,
    ],
    // G
    &[two(61, 53), REST, one(61), REST, two(53, 55), REST, one(61), REST],
    // A
    &[one(53), one(61), one(63), REST, two(55, 53), one(61), one(63), one(61)],
    // B
    &[
        two(53, 61), one(61), one(63), REST, two(53, 55), one(61), one(63), two(61, 55),
        two(53, 61), one(61), one(63), REST, two(53, 55), one(61), one(63), one(61),
        two(53, 61), one(61), one(63), REST, two(53, 55), one(61), one(63), one(55),
        two(53, 61), two(55, 61), one(63), REST, two(53, 55), one(61), one(63),
    ],
    // C
    &[
        one(53), REST, one(61), REST, two(53, 58), REST, two(63, 60), one(62),
        one(53), one(54), one(61), REST, two(53, 58), REST, one(63), one(61),
    ],
    // D
    &[
        one(56), REST, REST, REST, one(56), REST, REST, REST,
        one(56), REST, REST, REST, one(56), REST, two(54, 58), REST,
    ],
    // E
    &[one(62), REST, REST, one(58), REST, REST, one(58), REST],
];

#[rustfmt::skip]
static SYNTH_PATTERNS: [&[Step]; PATTERNS_PER_FAMILY] = [
    // F
    &[one(61), one(61), one(63), one(61), one(61), one(61), one(63), one(61)],
    // G
    &[one(67), one(67), REST, one(65), one(65), REST, one(67), REST],
    // A
    &[one(69), one(71), REST, one(71), REST, one(72), REST, one(74)],
    // B
    &[REST, REST, one(69), REST, REST, one(69), REST, one(71)],
    // C
    &[
        one(70), one(57), REST, REST, one(60), REST, REST, one(59),
        REST, one(68), one(62), REST, one(64), REST, REST, one(65),
        REST, REST, one(67), REST, one(66), one(69), REST, one(67),
        one(70), REST, one(71), REST, one(72), REST, REST,
    ],
    // D
    &[one(75), one(73), REST, two(70, 75), REST, REST],
    // E
    &[one(70), REST, one(70), REST, REST, one(75), REST, REST],
];
