//! Masked 8-line image used on the wire and between components

use super::LINE_COUNT;

/// 8 tally bits plus a mask of which lines carry a meaningful value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct WireSnapshot {
    /// Bit `n` set when line `n` is known
    pub mask: u8,
    /// Bit `n` is the value of line `n` (only meaningful under `mask`)
    pub bits: u8,
}

impl WireSnapshot {
    pub fn new(mask: u8, bits: u8) -> Self {
        // Normalise so unmasked bits never make two equal images compare unequal
        Self {
            mask,
            bits: bits & mask,
        }
    }

    /// Every line known
    pub fn full(bits: u8) -> Self {
        Self::new(0xFF, bits)
    }

    pub fn get(&self, line: usize) -> Option<bool> {
        if line >= LINE_COUNT || self.mask & (1 << line) == 0 {
            return None;
        }
        Some(self.bits & (1 << line) != 0)
    }

    /// Copy with one line set
    pub fn with(self, line: usize, value: bool) -> Self {
        if line >= LINE_COUNT {
            return self;
        }
        let bit = 1u8 << line;
        let bits = if value { self.bits | bit } else { self.bits & !bit };
        Self::new(self.mask | bit, bits)
    }

    /// Known lines as `(line, value)` pairs
    pub fn lines(&self) -> impl Iterator<Item = (usize, bool)> + '_ {
        (0..LINE_COUNT).filter_map(move |line| self.get(line).map(|v| (line, v)))
    }
}

impl std::fmt::Display for WireSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in 0..LINE_COUNT {
            let c = match self.get(line) {
                None => '-',
                Some(true) => '1',
                Some(false) => '0',
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
