//! Tally mode decoded from the legacy bitmask

use crate::error::{Result, TallyError};

/// The four legal tally modes
///
/// Decoded once at load time so the mediator matches on this enum instead of
/// testing bits at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TallyMode {
    /// Tally services off
    Disabled,
    /// Discrete inputs only
    GpioOnly,
    /// Remote controllers only
    TcpOnly,
    /// Both sides, each mirrored onto the other
    GpioTcpEcho,
}

impl TallyMode {
    const GPIO_BIT: u8 = 0b01;
    const TCP_BIT: u8 = 0b10;

    /// Decode `bit0 = GPIO`, `bit1 = TCP`. Anything above 3 is rejected.
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(TallyMode::Disabled),
            1 => Ok(TallyMode::GpioOnly),
            2 => Ok(TallyMode::TcpOnly),
            3 => Ok(TallyMode::GpioTcpEcho),
            other => Err(TallyError::config(format!(
                "tally_mode {} is not a valid mode (expected 0-3)",
                other
            ))),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            TallyMode::Disabled => 0,
            TallyMode::GpioOnly => Self::GPIO_BIT,
            TallyMode::TcpOnly => Self::TCP_BIT,
            TallyMode::GpioTcpEcho => Self::GPIO_BIT | Self::TCP_BIT,
        }
    }

    pub fn uses_gpio(self) -> bool {
        self.bits() & Self::GPIO_BIT != 0
    }

    pub fn uses_tcp(self) -> bool {
        self.bits() & Self::TCP_BIT != 0
    }
}

impl std::fmt::Display for TallyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TallyMode::Disabled => "disabled",
            TallyMode::GpioOnly => "gpio",
            TallyMode::TcpOnly => "tcp",
            TallyMode::GpioTcpEcho => "gpio+tcp (echo)",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_all_legal_modes() {
        for bits in 0..=3u8 {
            let mode = TallyMode::from_bits(bits).unwrap();
            assert_eq!(mode.bits(), bits);
        }
        assert!(TallyMode::GpioTcpEcho.uses_gpio());
        assert!(TallyMode::GpioTcpEcho.uses_tcp());
        assert!(!TallyMode::TcpOnly.uses_gpio());
        assert!(!TallyMode::Disabled.uses_tcp());
    }

    #[test]
    fn test_reject_unknown_bits() {
        assert!(matches!(TallyMode::from_bits(4), Err(TallyError::Config(_))));
        assert!(matches!(TallyMode::from_bits(255), Err(TallyError::Config(_))));
    }
}
