//! The 128-byte `EFI_PARTITION_ENTRY` record.

use crate::guid::EfiGuid;

/// Size UEFI mandates for the structure itself; the on-disk slot reserved
/// per entry is larger (see [`crate::gpt::disk::PARTITION_ENTRY_SLOT_SIZE`]).
pub const GPT_PARTITION_ENTRY_SIZE: usize = 128;

/// Bit 0 of `Attributes`: "this partition is required for the platform to
/// operate". Set on every partition this writer places, matching the
/// reference implementation.
pub const ATTR_REQUIRED_PARTITION: u64 = 1;

#[derive(Debug, Clone)]
pub struct GptPartitionEntry {
    pub partition_type_guid: EfiGuid,
    pub unique_partition_guid: EfiGuid,
    pub starting_lba: u64,
    pub ending_lba: u64,
    pub attributes: u64,
    /// UTF-16LE name, at most 36 code units (the remainder is zero-padded).
    pub name: [u16; 36],
}

impl GptPartitionEntry {
    pub fn new(
        partition_type_guid: EfiGuid,
        unique_partition_guid: EfiGuid,
        starting_lba: u64,
        ending_lba: u64,
        name: &str,
    ) -> Self {
        let mut encoded = [0u16; 36];
        for (slot, unit) in encoded.iter_mut().zip(name.encode_utf16()) {
            *slot = unit;
        }

        GptPartitionEntry {
            partition_type_guid,
            unique_partition_guid,
            starting_lba,
            ending_lba,
            attributes: ATTR_REQUIRED_PARTITION,
            name: encoded,
        }
    }

    pub fn to_bytes(&self) -> [u8; GPT_PARTITION_ENTRY_SIZE] {
        let mut b = [0u8; GPT_PARTITION_ENTRY_SIZE];
        let mut o = 0;

        b[o..o + 16].copy_from_slice(&self.partition_type_guid.to_bytes());
        o += 16;
        b[o..o + 16].copy_from_slice(&self.unique_partition_guid.to_bytes());
        o += 16;
        b[o..o + 8].copy_from_slice(&self.starting_lba.to_le_bytes());
        o += 8;
        b[o..o + 8].copy_from_slice(&self.ending_lba.to_le_bytes());
        o += 8;
        b[o..o + 8].copy_from_slice(&self.attributes.to_le_bytes());
        o += 8;
        for unit in &self.name {
            b[o..o + 2].copy_from_slice(&unit.to_le_bytes());
            o += 2;
        }
        debug_assert_eq!(o, GPT_PARTITION_ENTRY_SIZE);

        b
    }

    /// Decodes the name back to a Rust string, stopping at the first NUL,
    /// the way a reader (or our own round-trip tests) would.
    #[cfg(test)]
    pub fn name_string(&self) -> String {
        let trimmed: Vec<u16> = self.name.iter().copied().take_while(|&c| c != 0).collect();
        String::from_utf16_lossy(&trimmed)
    }
}
