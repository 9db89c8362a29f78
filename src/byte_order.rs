//! Network byte-order helpers for frame headers.
//!
//! The wire engine writes channel numbers and length prefixes big-endian. The
//! conversions live here so the lint expectation is stated once per width.

/// Serialise a channel number in network byte order.
///
/// # Examples
///
/// ```
/// use jmswire::byte_order::write_network_u16;
///
/// assert_eq!(write_network_u16(0x0102), [0x01, 0x02]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Frame headers are big-endian on the wire."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16` channel number.
///
/// # Examples
///
/// ```
/// use jmswire::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0x01, 0x02]), 0x0102);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Frame headers are big-endian on the wire."
    )]
    u16::from_be_bytes(bytes)
}

/// Serialise a frame length in network byte order.
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Frame headers are big-endian on the wire."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` frame length.
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Frame headers are big-endian on the wire."
    )]
    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{read_network_u16, read_network_u32, write_network_u16, write_network_u32};

    #[rstest]
    #[case(0, [0, 0])]
    #[case(1, [0, 1])]
    #[case(0xfffe, [0xff, 0xfe])]
    fn channel_numbers_are_big_endian(#[case] channel: u16, #[case] wire: [u8; 2]) {
        assert_eq!(write_network_u16(channel), wire);
        assert_eq!(read_network_u16(wire), channel);
    }

    #[test]
    fn length_prefix_is_big_endian() {
        assert_eq!(write_network_u32(0x0000_0110), [0, 0, 1, 0x10]);
        assert_eq!(read_network_u32([0, 0, 1, 0x10]), 0x110);
    }
}
