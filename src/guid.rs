//! EFI-style GUIDs: a 16-byte identifier whose first three fields are
//! little-endian and whose last field is an opaque byte string.
//!
//! [`uuid::Uuid`] stores its 16 bytes in RFC 4122 (big-endian) order; an
//! [`EfiGuid`] reinterprets that same byte string with `Data1`/`Data2`/`Data3`
//! swapped to little-endian, which is what UEFI firmware expects on disk.

use uuid::Uuid;

/// A GUID laid out the way `EFI_GUID` is: Data1/Data2/Data3 little-endian,
/// Data4 as a raw 8-byte tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EfiGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl EfiGuid {
    pub const ZERO: EfiGuid = EfiGuid {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };

    /// Builds an `EfiGuid` from the big-endian 16-byte form produced by
    /// `Uuid::into_bytes`, preserving the UUID's own field boundaries.
    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        EfiGuid {
            data1: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            data2: u16::from_be_bytes(bytes[4..6].try_into().unwrap()),
            data3: u16::from_be_bytes(bytes[6..8].try_into().unwrap()),
            data4: bytes[8..16].try_into().unwrap(),
        }
    }

    /// Parses a canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` string
    /// (used for the well-known partition type GUIDs).
    pub fn parse(s: &str) -> Self {
        let uuid = Uuid::parse_str(s).expect("well-known GUID literal must parse");
        Self::from_be_bytes(*uuid.as_bytes())
    }

    /// A fresh random GUID, suitable for a unique partition id or disk id.
    pub fn new_random() -> Self {
        Self::from_be_bytes(*Uuid::new_v4().as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Serialises to the 16-byte on-disk `EFI_GUID` layout.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..16].copy_from_slice(&self.data4);
        out
    }
}

/// Well-known GPT partition type GUIDs referenced by the manifest.
pub mod partition_type {
    use super::EfiGuid;

    pub fn efi_system() -> EfiGuid {
        EfiGuid::parse("C12A7328-F81F-11D2-BA4B-00A0C93EC93B")
    }

    pub fn microsoft_basic_data() -> EfiGuid {
        EfiGuid::parse("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7")
    }

    pub fn linux_swap() -> EfiGuid {
        EfiGuid::parse("0657FD6D-A4AB-43C4-84E5-0933C84B4F4F")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let guid = EfiGuid::new_random();
        let bytes = guid.to_bytes();
        let data1 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(data1, guid.data1);
    }

    #[test]
    fn efi_system_guid_matches_spec_literal() {
        let guid = partition_type::efi_system();
        // C12A7328-F81F-11D2-BA4B-00A0C93EC93B
        assert_eq!(guid.data1, 0xC12A7328);
        assert_eq!(guid.data2, 0xF81F);
        assert_eq!(guid.data3, 0x11D2);
        assert_eq!(guid.data4, [0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B]);
    }

    #[test]
    fn zero_guid_is_zero() {
        assert!(EfiGuid::ZERO.is_zero());
        assert!(!partition_type::efi_system().is_zero());
    }
}
