/// Drum voice descriptors and the combined pose shown for a step
///
/// Each drum sound maps to a face, the hands that strike it, and an artwork
/// layer. When a step plays two sounds at once the pose is the intersection of
/// what both voices allow.
use std::fmt;

/// Which hands strike a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hands {
    pub left: bool,
    pub right: bool,
}

impl Hands {
    pub const NONE: Hands = Hands {
        left: false,
        right: false,
    };
    pub const LEFT: Hands = Hands {
        left: true,
        right: false,
    };
    pub const RIGHT: Hands = Hands {
        left: false,
        right: true,
    };
    pub const BOTH: Hands = Hands {
        left: true,
        right: true,
    };

    pub fn both(self) -> bool {
        self.left && self.right
    }

    pub fn and(self, other: Hands) -> Hands {
        Hands {
            left: self.left && other.left,
            right: self.right && other.right,
        }
    }
}

impl fmt::Display for Hands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let left = if self.left { 'L' } else { '-' };
        let right = if self.right { 'R' } else { '-' };
        write!(f, "{}{}", left, right)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrumVoice {
    pub name: &'static str,
    pub face: u8,
    pub hands: Hands,
    pub layer: &'static str,
    pub cowbell: bool,
}

const fn voice(name: &'static str, face: u8, hands: Hands, layer: &'static str) -> DrumVoice {
    DrumVoice {
        name,
        face,
        hands,
        layer,
        cowbell: true,
    }
}

pub const DRUM_VOICES: [DrumVoice; 12] = [
    voice("kick", 5, Hands::BOTH, "d0"),
    voice("kick-alt", 0, Hands::BOTH, "d1"),
    voice("snare", 1, Hands::RIGHT, "d2"),
    voice("snare-alt", 2, Hands::LEFT, "d3"),
    voice("rimshot", 3, Hands::RIGHT, "d4"),
    voice("hand-clap", 4, Hands::LEFT, "d5"),
    voice("tambourine", 5, Hands::RIGHT, "d6"),
    voice("08", 0, Hands::LEFT, "d7"),
    voice("closed-hihat", 1, Hands::RIGHT, "d8"),
    voice("09", 2, Hands::LEFT, "d9"),
    DrumVoice {
        cowbell: false,
        ..voice("open-hihat", 3, Hands::RIGHT, "d10")
    },
    voice("10", 4, Hands::NONE, "d11"),
];

/// Voice for a note reference; references past the table wrap around.
pub fn drum_voice(reference: u8) -> &'static DrumVoice {
    &DRUM_VOICES[reference as usize % DRUM_VOICES.len()]
}

/// What the drummer shows for one step. Every listed layer gets one hit
/// pulse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrumPose {
    pub face: u8,
    pub hands: Hands,
    pub cowbell: bool,
    pub primary: &'static str,
    pub secondary: Option<&'static str>,
}

impl DrumPose {
    pub fn single(reference: u8) -> Self {
        let v = drum_voice(reference);
        Self {
            face: v.face,
            hands: v.hands,
            cowbell: v.cowbell,
            primary: v.layer,
            secondary: None,
        }
    }

    pub fn pair(first: u8, second: u8) -> Self {
        let (a, b) = (drum_voice(first), drum_voice(second));
        let wide = a.hands.both() || b.hands.both() || !a.cowbell || !b.cowbell;
        Self {
            face: a.face,
            hands: a.hands.and(b.hands),
            cowbell: a.cowbell && b.cowbell,
            primary: a.layer,
            secondary: wide.then_some(b.layer),
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.primary).chain(self.secondary)
    }
}
