//! AN3155 wire constants and frame checksums

/// Synchronisation character used for autobaud detection
pub const UART_DISC: u8 = 0x7F;

pub const UART_ACK: u8 = 0x79;
pub const UART_NACK: u8 = 0x1F;

/// Maximum payload of a single read or write memory command
pub const MAX_CHUNK: usize = 256;

#[derive(Copy, Debug, PartialEq, Clone)]
pub enum Command {
    /// Fetch bootloader version and allowed commands
    Get = 0x00,

    /// Gets the chip ID
    GetId = 0x02,

    /// Reads up to 256 bytes of memory starting from an address specified by the application.
    ReadMemory = 0x11,

    /// Jumps to user application code located in the internal Flash memory or in the SRAM.
    Go = 0x21,

    /// Writes up to 256 bytes to the RAM or Flash memory starting from an address specified by the application.
    WriteMemory = 0x31,

    /// Enables the read protection
    ReadoutProtect = 0x82,

    /// Disables the read protection.
    ReadoutUnprotect = 0x92,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Compute the checksum byte for a frame.
///
/// Single byte frames (commands, read lengths) are sent with their complement,
/// longer frames with the XOR of all bytes.
pub fn checksum(frame: &[u8]) -> u8 {
    match frame {
        [b] => !b,
        _ => frame.iter().fold(0, |cs, b| cs ^ b),
    }
}

/// Append the checksum byte to a frame ready for transmission
pub fn append_checksum(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 1);
    out.extend_from_slice(frame);
    out.push(checksum(frame));
    out
}
