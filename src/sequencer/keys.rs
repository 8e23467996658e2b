/// Control-keyboard mapping and the per-family stack of held pattern keys
use super::pattern::PATTERNS_PER_FAMILY;
use super::Family;

/// White keys F3..E5, in key-index order.
pub const WHITE_KEYS: [u8; 14] = [53, 55, 57, 59, 60, 62, 64, 65, 67, 69, 71, 72, 74, 76];

/// A control key resolved to the pattern it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternKey {
    pub family: Family,
    pub pattern: usize,
}

/// Index 0..13 of a white control key, `None` for anything else.
pub fn key_index(note: u8) -> Option<usize> {
    WHITE_KEYS.iter().position(|&key| key == note)
}

/// Lower octave half selects drum patterns, upper half synth patterns.
pub fn pattern_key(note: u8) -> Option<PatternKey> {
    let index = key_index(note)?;
    Some(if index < PATTERNS_PER_FAMILY {
        PatternKey {
            family: Family::Drum,
            pattern: index,
        }
    } else {
        PatternKey {
            family: Family::Synth,
            pattern: index - PATTERNS_PER_FAMILY,
        }
    })
}

/// Pattern keys currently held, oldest first. Repeated presses of the same
/// key are each recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldKeys {
    keys: Vec<usize>,
}

impl HeldKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, pattern: usize) {
        self.keys.push(pattern);
    }

    /// Remove the most recent press of `pattern`. Returns false when it was
    /// not held.
    pub fn release(&mut self, pattern: usize) -> bool {
        match self.keys.iter().rposition(|&p| p == pattern) {
            Some(at) => {
                self.keys.remove(at);
                true
            }
            None => false,
        }
    }

    /// Most recently pressed key still held.
    pub fn current(&self) -> Option<usize> {
        self.keys.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
