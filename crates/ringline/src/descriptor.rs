//! Transfer descriptors and transfer modes.

/// Size of one encoded descriptor on a command ring.
pub const XFER_DESC_SIZE: usize = 8;

/// A transfer descriptor: one payload slice in the transfer buffer.
///
/// Descriptors travel over the command rings as two little-endian u32
/// words. The `(offset, size)` range always lies entirely inside the
/// transfer buffer; the producer publishes a descriptor only after the
/// payload bytes are in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct XferDesc {
    /// Byte offset of the payload in the transfer buffer.
    pub offset: u32,
    /// Payload length in bytes.
    pub size: u32,
}

const _: () = assert!(core::mem::size_of::<XferDesc>() == XFER_DESC_SIZE);

impl XferDesc {
    /// Encode as little-endian wire bytes.
    #[inline]
    pub fn to_bytes(self) -> [u8; XFER_DESC_SIZE] {
        let mut out = [0u8; XFER_DESC_SIZE];
        out[..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decode from little-endian wire bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; XFER_DESC_SIZE]) -> Self {
        Self {
            offset: u32::from_le_bytes(bytes[..4].try_into().unwrap()),
            size: u32::from_le_bytes(bytes[4..].try_into().unwrap()),
        }
    }
}

/// The descriptor family currently active on the command ring.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Descriptors reference payload slices in the transfer buffer.
    Type1 = 1,
    /// Reserved. Consumers make no progress on it.
    Type2 = 2,
    /// Payload bytes stream over the large ring; must be paired with an
    /// empty command ring and a non-zero announced transfer size.
    Type3 = 3,
}

impl TransferMode {
    /// Convert from the raw config word.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(TransferMode::Type1),
            2 => Some(TransferMode::Type2),
            3 => Some(TransferMode::Type3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_wire_round_trip() {
        let desc = XferDesc {
            offset: 0x1234,
            size: 384,
        };
        assert_eq!(XferDesc::from_bytes(desc.to_bytes()), desc);
    }

    #[test]
    fn test_desc_wire_encoding_is_little_endian() {
        let desc = XferDesc {
            offset: 0x0102_0304,
            size: 0x0506_0708,
        };
        assert_eq!(
            desc.to_bytes(),
            [0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05]
        );
    }

    #[test]
    fn test_transfer_mode_round_trip() {
        assert_eq!(TransferMode::from_u32(1), Some(TransferMode::Type1));
        assert_eq!(TransferMode::from_u32(2), Some(TransferMode::Type2));
        assert_eq!(TransferMode::from_u32(3), Some(TransferMode::Type3));
        assert_eq!(TransferMode::from_u32(0), None);
        assert_eq!(TransferMode::from_u32(4), None);
    }
}
