//! 32-byte FAT directory entries: the short (8.3) form and the VFAT long-name
//! chain entries used to carry the full UTF-8 name alongside it.

use crate::fat32::datetime::FatDateTime;

pub const DIR_ENTRY_SIZE: usize = 32;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

const LAST_LONG_ENTRY: u8 = 0x40;
const CHARS_PER_LONG_ENTRY: usize = 13;

/// The 32-byte short-name directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub short_name: [u8; 11],
    pub attributes: u8,
    pub created: FatDateTime,
    pub written: FatDateTime,
    pub first_cluster: u32,
    pub file_size: u32,
}

impl DirEntry {
    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut b = [0u8; DIR_ENTRY_SIZE];
        b[0..11].copy_from_slice(&self.short_name);
        b[11] = self.attributes;
        // NTRes, CrtTimeTenth stay zero.
        b[14..16].copy_from_slice(&self.created.pack_time().to_le_bytes());
        b[16..18].copy_from_slice(&self.created.pack_date().to_le_bytes());
        b[18..20].copy_from_slice(&self.created.pack_date().to_le_bytes()); // LstAccDate
        b[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        b[22..24].copy_from_slice(&self.written.pack_time().to_le_bytes());
        b[24..26].copy_from_slice(&self.written.pack_date().to_le_bytes());
        b[26..28].copy_from_slice(&((self.first_cluster & 0xFFFF) as u16).to_le_bytes());
        b[28..32].copy_from_slice(&self.file_size.to_le_bytes());
        b
    }

    pub fn is_free(bytes: &[u8; DIR_ENTRY_SIZE]) -> bool {
        bytes[0] == 0x00 || bytes[0] == 0xE5
    }
}

/// One 32-byte VFAT long-name chain entry.
#[derive(Debug, Clone)]
struct LongDirEntry {
    ordinal: u8,
    name_units: [u16; CHARS_PER_LONG_ENTRY],
    checksum: u8,
}

impl LongDirEntry {
    fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut b = [0u8; DIR_ENTRY_SIZE];
        b[0] = self.ordinal;
        for (i, unit) in self.name_units[0..5].iter().enumerate() {
            b[1 + i * 2..3 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        b[11] = ATTR_LONG_NAME;
        // Type stays zero.
        b[13] = self.checksum;
        for (i, unit) in self.name_units[5..11].iter().enumerate() {
            b[14 + i * 2..16 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        // FstClusLO stays zero.
        for (i, unit) in self.name_units[11..13].iter().enumerate() {
            b[28 + i * 2..30 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        b
    }
}

/// Derives an 8.3 short name from an arbitrary file/directory name. Names
/// that do not fit are truncated to six base characters plus a literal
/// `~1` suffix; this writer never disambiguates collisions (single-pass
/// authoring, not a general-purpose filesystem).
pub fn get_short_name(name: &str) -> [u8; 11] {
    let upper: String = name.to_uppercase();
    let (base, ext) = match upper.split_once('.') {
        Some((b, e)) if !b.is_empty() => (b, e),
        _ => (upper.as_str(), ""),
    };

    let base: String = base.chars().filter(|c| !c.is_whitespace()).collect();
    let ext: String = ext.chars().filter(|c| !c.is_whitespace()).collect();

    let is_long = base.chars().count() > 8 || ext.chars().count() > 3;

    let mut short = [b' '; 11];
    if is_long {
        let truncated: String = base.chars().take(6).collect();
        for (i, b) in truncated.bytes().take(6).enumerate() {
            short[i] = b;
        }
        short[6] = b'~';
        short[7] = b'1';
    } else {
        for (i, b) in base.bytes().take(8).enumerate() {
            short[i] = b;
        }
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        short[8 + i] = b;
    }
    short
}

/// Rotate-right-accumulate checksum over the 11-byte short name, per the
/// VFAT specification.
pub fn short_name_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &byte in short_name {
        sum = (if sum & 1 != 0 { 0x80 } else { 0 })
            .wrapping_add(sum >> 1)
            .wrapping_add(byte);
    }
    sum
}

/// Builds the chain of long-name entries for `name`, ordered the way they
/// must appear on disk: highest ordinal first, ordinal 1 (with the short
/// entry immediately following) last.
pub fn build_long_name_chain(name: &str, short_name: &[u8; 11]) -> Vec<[u8; DIR_ENTRY_SIZE]> {
    let checksum = short_name_checksum(short_name);
    let units: Vec<u16> = name.encode_utf16().collect();
    let chunk_count = units.len().div_ceil(CHARS_PER_LONG_ENTRY).max(1);

    let mut chunks: Vec<[u16; CHARS_PER_LONG_ENTRY]> = Vec::with_capacity(chunk_count);
    for chunk_idx in 0..chunk_count {
        let start = chunk_idx * CHARS_PER_LONG_ENTRY;
        let mut chunk = [0xFFFFu16; CHARS_PER_LONG_ENTRY];
        let mut terminated = false;
        for (slot, unit_idx) in (0..CHARS_PER_LONG_ENTRY).zip(start..start + CHARS_PER_LONG_ENTRY) {
            if let Some(&unit) = units.get(unit_idx) {
                chunk[slot] = unit;
            } else if !terminated {
                chunk[slot] = 0x0000;
                terminated = true;
            }
        }
        chunks.push(chunk);
    }

    let mut entries = Vec::with_capacity(chunk_count);
    for (i, chunk) in chunks.iter().enumerate().rev() {
        let ordinal_value = (i + 1) as u8;
        let ordinal = if i == chunks.len() - 1 {
            ordinal_value | LAST_LONG_ENTRY
        } else {
            ordinal_value
        };
        entries.push(
            LongDirEntry {
                ordinal,
                name_units: *chunk,
                checksum,
            }
            .to_bytes(),
        );
    }
    entries
}
