//! The 92-byte `EFI_PARTITION_TABLE_HEADER`, serialised explicitly
//! field-by-field (no `#[repr(C, packed)]` + pointer cast: those sidestep
//! endianness and alignment instead of encoding them, see `DESIGN.md`).

use crate::guid::EfiGuid;

pub const GPT_HEADER_SIZE: usize = 92;
pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;

/// `HeaderSize` and the header CRC32's domain are both the sector size, not
/// the 92-byte struct length: the on-disk header occupies the first 92
/// bytes of an otherwise-zeroed 512-byte sector buffer, and the CRC32 is
/// computed over the whole buffer.
pub const GPT_HEADER_CRC_DOMAIN: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct GptHeader {
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: EfiGuid,
    pub partition_entry_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_entry_array_crc32: u32,
    pub header_crc32: u32,
}

impl GptHeader {
    /// Serialises the header to exactly [`GPT_HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> [u8; GPT_HEADER_SIZE] {
        let mut b = [0u8; GPT_HEADER_SIZE];
        let mut o = 0;

        b[o..o + 8].copy_from_slice(&GPT_SIGNATURE);
        o += 8;
        b[o..o + 4].copy_from_slice(&GPT_REVISION.to_le_bytes());
        o += 4;
        b[o..o + 4].copy_from_slice(&(GPT_HEADER_CRC_DOMAIN as u32).to_le_bytes());
        o += 4;
        b[o..o + 4].copy_from_slice(&self.header_crc32.to_le_bytes());
        o += 4;
        b[o..o + 4].copy_from_slice(&0u32.to_le_bytes()); // Reserved
        o += 4;
        b[o..o + 8].copy_from_slice(&self.my_lba.to_le_bytes());
        o += 8;
        b[o..o + 8].copy_from_slice(&self.alternate_lba.to_le_bytes());
        o += 8;
        b[o..o + 8].copy_from_slice(&self.first_usable_lba.to_le_bytes());
        o += 8;
        b[o..o + 8].copy_from_slice(&self.last_usable_lba.to_le_bytes());
        o += 8;
        b[o..o + 16].copy_from_slice(&self.disk_guid.to_bytes());
        o += 16;
        b[o..o + 8].copy_from_slice(&self.partition_entry_lba.to_le_bytes());
        o += 8;
        b[o..o + 4].copy_from_slice(&self.num_partition_entries.to_le_bytes());
        o += 4;
        b[o..o + 4].copy_from_slice(&self.partition_entry_size.to_le_bytes());
        o += 4;
        b[o..o + 4].copy_from_slice(&self.partition_entry_array_crc32.to_le_bytes());
        o += 4;
        debug_assert_eq!(o, GPT_HEADER_SIZE);

        b
    }

    /// Recomputes `header_crc32` with the CRC field held at zero. The CRC
    /// runs over a zeroed [`GPT_HEADER_CRC_DOMAIN`]-byte sector buffer with
    /// the 92-byte encoding copied into its front, matching `HeaderSize`.
    pub fn with_crc32(mut self) -> Self {
        self.header_crc32 = 0;
        let mut sector = [0u8; GPT_HEADER_CRC_DOMAIN];
        sector[..GPT_HEADER_SIZE].copy_from_slice(&self.to_bytes());
        self.header_crc32 = crc32fast::hash(&sector);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GptHeader {
        GptHeader {
            my_lba: 1,
            alternate_lba: 100,
            first_usable_lba: 40,
            last_usable_lba: 90,
            disk_guid: EfiGuid::new_random(),
            partition_entry_lba: 2,
            num_partition_entries: 1,
            partition_entry_size: 128,
            partition_entry_array_crc32: 0xDEAD_BEEF,
            header_crc32: 0,
        }
    }

    #[test]
    fn encodes_signature_and_size() {
        let h = sample();
        let bytes = h.to_bytes();
        assert_eq!(&bytes[0..8], b"EFI PART");
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 512);
    }

    #[test]
    fn crc32_is_stable_and_excludes_itself() {
        let h = sample().with_crc32();
        let recomputed = {
            let mut zeroed = h;
            zeroed.header_crc32 = 0;
            let mut sector = [0u8; GPT_HEADER_CRC_DOMAIN];
            sector[..GPT_HEADER_SIZE].copy_from_slice(&zeroed.to_bytes());
            crc32fast::hash(&sector)
        };
        assert_eq!(h.header_crc32, recomputed);
    }
}
