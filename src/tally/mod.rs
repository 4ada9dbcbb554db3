//! Tally state types
//!
//! The authoritative state is 8 boolean lines, each tagged with the side that
//! last supplied it. [`TallyState`] is the single writer (owned by the
//! mediator); [`TallyReader`] handles are given to the renderer.

mod shared;
mod wire;

pub use shared::{TallyReader, TallyState};
pub use wire::WireSnapshot;

/// Number of tally lines in the bank
pub const LINE_COUNT: usize = 8;

/// Which side last supplied a line's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Provenance {
    /// No value received yet
    #[default]
    Unset,
    /// Local discrete input
    Local,
    /// Remote tally controller
    Remote,
}

impl Provenance {
    fn to_bits(self) -> u32 {
        match self {
            Provenance::Unset => 0,
            Provenance::Local => 1,
            Provenance::Remote => 2,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => Provenance::Local,
            2 => Provenance::Remote,
            _ => Provenance::Unset,
        }
    }
}

/// One tally line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TallyLine {
    pub value: bool,
    pub provenance: Provenance,
}

impl TallyLine {
    pub fn new(value: bool, provenance: Provenance) -> Self {
        Self { value, provenance }
    }

    /// The value only means something once a side has supplied it
    pub fn is_set(&self) -> bool {
        self.provenance != Provenance::Unset
    }

    /// On-air as far as the display is concerned
    pub fn is_on(&self) -> bool {
        self.is_set() && self.value
    }
}

/// Full 8-line tally state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TallySnapshot {
    lines: [TallyLine; LINE_COUNT],
}

impl TallySnapshot {
    pub fn from_lines(lines: [TallyLine; LINE_COUNT]) -> Self {
        Self { lines }
    }

    /// Line accessor; panics on an out-of-range index like slice indexing does
    pub fn line(&self, index: usize) -> TallyLine {
        self.lines[index]
    }

    pub fn lines(&self) -> &[TallyLine; LINE_COUNT] {
        &self.lines
    }

    pub fn is_on(&self, index: usize) -> bool {
        self.lines.get(index).map(TallyLine::is_on).unwrap_or(false)
    }

    /// Pack into 32 bits: 4 bits per line (value in bit 0, provenance in bits 1-2)
    pub(crate) fn pack(&self) -> u32 {
        self.lines.iter().enumerate().fold(0u32, |acc, (i, line)| {
            let nibble = (line.value as u32) | (line.provenance.to_bits() << 1);
            acc | (nibble << (i * 4))
        })
    }

    pub(crate) fn unpack(packed: u32) -> Self {
        let mut lines = [TallyLine::default(); LINE_COUNT];
        for (i, line) in lines.iter_mut().enumerate() {
            let nibble = (packed >> (i * 4)) & 0xF;
            *line = TallyLine::new(nibble & 1 == 1, Provenance::from_bits(nibble >> 1));
        }
        Self { lines }
    }
}

impl std::fmt::Display for TallySnapshot {
    /// One character per line: `-` unset, `l`/`L` local off/on, `r`/`R` remote off/on
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            let c = match (line.provenance, line.value) {
                (Provenance::Unset, _) => '-',
                (Provenance::Local, false) => 'l',
                (Provenance::Local, true) => 'L',
                (Provenance::Remote, false) => 'r',
                (Provenance::Remote, true) => 'R',
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
