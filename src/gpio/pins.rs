//! Per-line pull resistor descriptor (`gpio_pulls`)

use std::str::FromStr;

use crate::error::TallyError;
use crate::tally::LINE_COUNT;

/// Pull resistor mode for one input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullMode {
    /// `U`
    Up,
    /// `D`
    Down,
    /// `O`, floating
    Off,
}

impl PullMode {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'U' => Some(PullMode::Up),
            'D' => Some(PullMode::Down),
            'O' => Some(PullMode::Off),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            PullMode::Up => 'U',
            PullMode::Down => 'D',
            PullMode::Off => 'O',
        }
    }
}

/// Eight pull modes, one per line, parsed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    pulls: [PullMode; LINE_COUNT],
}

impl PinConfig {
    pub fn new(pulls: [PullMode; LINE_COUNT]) -> Self {
        Self { pulls }
    }

    pub fn pull(&self, line: usize) -> Option<PullMode> {
        self.pulls.get(line).copied()
    }

    pub fn pulls(&self) -> &[PullMode; LINE_COUNT] {
        &self.pulls
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        Self::new([PullMode::Up; LINE_COUNT])
    }
}

impl FromStr for PinConfig {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != LINE_COUNT {
            return Err(TallyError::config(format!(
                "gpio_pulls '{}' must have exactly {} characters, got {}",
                s,
                LINE_COUNT,
                chars.len()
            )));
        }

        let mut pulls = [PullMode::Off; LINE_COUNT];
        for (line, c) in chars.into_iter().enumerate() {
            pulls[line] = PullMode::from_char(c).ok_or_else(|| {
                TallyError::config(format!(
                    "gpio_pulls '{}': invalid mode '{}' for line {} (expected U, D or O)",
                    s, c, line
                ))
            })?;
        }
        Ok(Self { pulls })
    }
}

impl std::fmt::Display for PinConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for pull in &self.pulls {
            write!(f, "{}", pull.as_char())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_mixed_pulls() {
        let pins: PinConfig = "UDOUUDDO".parse().unwrap();
        assert_eq!(pins.pull(0), Some(PullMode::Up));
        assert_eq!(pins.pull(1), Some(PullMode::Down));
        assert_eq!(pins.pull(2), Some(PullMode::Off));
        assert_eq!(pins.pull(8), None);
    }

    #[test]
    fn test_lowercase_is_accepted() {
        let pins: PinConfig = "uuuudddd".parse().unwrap();
        assert_eq!(pins.to_string(), "UUUUDDDD");
    }

    #[test]
    fn test_rejects_wrong_length_and_chars() {
        assert!(matches!("".parse::<PinConfig>(), Err(TallyError::Config(_))));
        assert!(matches!("UUUUUUU".parse::<PinConfig>(), Err(TallyError::Config(_))));
        assert!(matches!("UUUUUUUUU".parse::<PinConfig>(), Err(TallyError::Config(_))));
        assert!(matches!("UUUUUUUX".parse::<PinConfig>(), Err(TallyError::Config(_))));
        assert!(matches!("UUUUUUÜ1".parse::<PinConfig>(), Err(TallyError::Config(_))));
    }

    proptest! {
        #[test]
        fn prop_valid_strings_round_trip(s in "[UDO]{8}") {
            let pins: PinConfig = s.parse().unwrap();
            prop_assert_eq!(pins.to_string(), s.clone());
            for (line, c) in s.chars().enumerate() {
                prop_assert_eq!(pins.pull(line).map(PullMode::as_char), Some(c));
            }
        }

        #[test]
        fn prop_wrong_length_fails(s in "[UDO]{0,7}|[UDO]{9,16}") {
            prop_assert!(matches!(s.parse::<PinConfig>(), Err(TallyError::Config(_))));
        }

        #[test]
        fn prop_foreign_char_fails(prefix in "[UDO]{0,7}", bad in "[^UDOudo]") {
            let mut s = prefix.clone();
            s.push_str(&bad);
            while s.chars().count() < LINE_COUNT {
                s.push('U');
            }
            prop_assert!(matches!(s.parse::<PinConfig>(), Err(TallyError::Config(_))));
        }
    }
}
