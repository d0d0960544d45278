//! Command codes for the A0 protocol.
//!
//! Commands are sent to the reader inside an A0 frame. Tag reports come back
//! under the inventory command that produced them.

use crate::types::Region;

/// Address that every reader on the link accepts.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Repeat count for real-time inventory; 0xFF runs until told otherwise.
pub const INVENTORY_REPEAT: u8 = 0xFF;

/// Command codes exchanged with the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Reset the reader.
    Reset = 0x70,
    /// Set RF output power (dBm).
    SetOutputPower = 0x76,
    /// Set frequency region and channel range.
    SetFrequencyRegion = 0x78,
    /// Set beeper behaviour.
    SetBeeperMode = 0x7A,
    /// Real-time inventory; tags are reported as they are read.
    RealTimeInventory = 0x89,
    /// Inventory switching antennas between rounds.
    FastSwitchAntInventory = 0x8A,
    /// Inventory with explicit session and target.
    CustomizedSessionTargetInventory = 0x8B,
}

impl CommandCode {
    /// Maps a wire byte to a known command.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x70 => Some(Self::Reset),
            0x76 => Some(Self::SetOutputPower),
            0x78 => Some(Self::SetFrequencyRegion),
            0x7A => Some(Self::SetBeeperMode),
            0x89 => Some(Self::RealTimeInventory),
            0x8A => Some(Self::FastSwitchAntInventory),
            0x8B => Some(Self::CustomizedSessionTargetInventory),
            _ => None,
        }
    }

    /// Returns true for commands whose responses carry tag reports.
    #[must_use]
    pub const fn is_tag_report(self) -> bool {
        matches!(
            self,
            Self::RealTimeInventory
                | Self::FastSwitchAntInventory
                | Self::CustomizedSessionTargetInventory
        )
    }
}

impl From<CommandCode> for u8 {
    fn from(cmd: CommandCode) -> Self {
        cmd as Self
    }
}

/// Region code and channel range for [`CommandCode::SetFrequencyRegion`].
#[must_use]
pub const fn region_payload(region: Region) -> [u8; 3] {
    match region {
        Region::Fcc => [0x01, 0x07, 0x3B],
        Region::Etsi => [0x02, 0x00, 0x06],
        Region::Chn => [0x03, 0x2B, 0x35],
    }
}

/// Beeper mode byte: beep once per inventory round, or stay quiet.
#[must_use]
pub const fn beeper_mode(enabled: bool) -> u8 {
    if enabled { 0x01 } else { 0x00 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_values() {
        assert_eq!(CommandCode::Reset as u8, 0x70);
        assert_eq!(CommandCode::SetOutputPower as u8, 0x76);
        assert_eq!(CommandCode::SetFrequencyRegion as u8, 0x78);
        assert_eq!(CommandCode::SetBeeperMode as u8, 0x7A);
        assert_eq!(CommandCode::RealTimeInventory as u8, 0x89);
    }

    #[test]
    fn test_from_byte() {
        assert_eq!(CommandCode::from_byte(0x8A), Some(CommandCode::FastSwitchAntInventory));
        assert_eq!(CommandCode::from_byte(0x42), None);
        let byte: u8 = CommandCode::CustomizedSessionTargetInventory.into();
        assert_eq!(CommandCode::from_byte(byte), Some(CommandCode::CustomizedSessionTargetInventory));
    }

    #[test]
    fn test_tag_report_commands() {
        assert!(CommandCode::RealTimeInventory.is_tag_report());
        assert!(CommandCode::CustomizedSessionTargetInventory.is_tag_report());
        assert!(!CommandCode::SetOutputPower.is_tag_report());
    }

    #[test]
    fn test_region_payload() {
        assert_eq!(region_payload(Region::Fcc), [0x01, 0x07, 0x3B]);
        assert_eq!(region_payload(Region::Etsi)[0], 0x02);
        assert_eq!(region_payload(Region::Chn)[0], 0x03);
    }
}
