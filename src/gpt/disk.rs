//! GPT disk layouter: assigns partitions their LBA ranges, then writes the
//! protective MBR, primary/backup GPT headers and partition arrays.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::{debug, info};

use crate::error::{DiskImageError, Result};
use crate::gpt::header::{GPT_HEADER_SIZE, GptHeader};
use crate::gpt::mbr::{MBR_SIZE, protective_mbr};
use crate::gpt::partition_entry::{GPT_PARTITION_ENTRY_SIZE, GptPartitionEntry};
use crate::guid::EfiGuid;

pub const SECTOR_SIZE: u64 = 512;

/// UEFI's minimum reserved size for the entry array; this writer reserves
/// twice that per entry (see `DESIGN.md`), stamped into `SizeOfPartitionEntry`.
const EFI_GPT_PART_ENTRY_MIN_SIZE: u64 = 16384;
pub const PARTITION_ENTRY_SLOT_SIZE: u64 = 2 * EFI_GPT_PART_ENTRY_MIN_SIZE;

/// Gap, in LBAs, reserved between adjacent partitions.
const PARTITION_GAP_LBAS: u64 = 2;

/// A partition as given by the caller, before LBAs are assigned.
#[derive(Debug, Clone)]
pub struct ConfiguredPartition {
    pub partition_type: EfiGuid,
    pub lba_count: u64,
    pub name: String,
}

/// A partition once `configure_disk` has assigned it a GUID and LBA range.
#[derive(Debug, Clone)]
pub struct PlacedPartition {
    pub partition_type: EfiGuid,
    pub partition_id: EfiGuid,
    pub lba_count: u64,
    pub starting_lba: u64,
    pub ending_lba: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GptState {
    Unconfigured,
    Configured,
    Written,
}

/// Writes a GPT-partitioned raw disk image to a single output file.
///
/// Usage follows `Unconfigured -> Configured -> Written`: `configure_disk`
/// then `create_disk`. `get_partition` only answers once the disk has been
/// written, matching the reference implementation's state machine.
pub struct GptDisk {
    path: PathBuf,
    state: GptState,
    partitions: Vec<PlacedPartition>,
    disk_guid: EfiGuid,
    partition_table_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    backup_partition_table_lba: u64,
    secondary_header_lba: u64,
    total_sectors: u64,
}

impl GptDisk {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        GptDisk {
            path: path.into(),
            state: GptState::Unconfigured,
            partitions: Vec::new(),
            disk_guid: EfiGuid::ZERO,
            partition_table_lba: 2,
            first_usable_lba: 0,
            last_usable_lba: 0,
            backup_partition_table_lba: 0,
            secondary_header_lba: 0,
            total_sectors: 0,
        }
    }

    /// Assigns each configured partition a unique GUID and a contiguous LBA
    /// range, laid out head-to-tail in input order with a 2-LBA gap between
    /// neighbours.
    pub fn configure_disk(&mut self, configs: &[ConfiguredPartition]) {
        self.disk_guid = EfiGuid::new_random();

        let n = configs.len() as u64;
        let partition_table_lba = 2u64;
        let first_usable_lba =
            partition_table_lba + (PARTITION_ENTRY_SLOT_SIZE * n).div_ceil(SECTOR_SIZE) + 1;

        let mut placed = Vec::with_capacity(configs.len());
        let mut current_lba = first_usable_lba;
        for config in configs {
            let starting_lba = current_lba;
            current_lba += config.lba_count - 1;
            let ending_lba = current_lba;
            placed.push(PlacedPartition {
                partition_type: config.partition_type,
                partition_id: EfiGuid::new_random(),
                lba_count: config.lba_count,
                starting_lba,
                ending_lba,
                name: config.name.clone(),
            });
            current_lba += PARTITION_GAP_LBAS;
        }

        let last_usable_lba = current_lba;
        let backup_partition_table_lba = last_usable_lba + 1;
        let secondary_header_lba = backup_partition_table_lba
            + (PARTITION_ENTRY_SLOT_SIZE * n).div_ceil(SECTOR_SIZE);

        self.partition_table_lba = partition_table_lba;
        self.first_usable_lba = first_usable_lba;
        self.last_usable_lba = last_usable_lba;
        self.backup_partition_table_lba = backup_partition_table_lba;
        self.secondary_header_lba = secondary_header_lba;
        self.total_sectors = secondary_header_lba + 1;
        self.partitions = placed;
        self.state = GptState::Configured;

        debug!(
            "configure_disk: {} partitions, first_usable={}, last_usable={}, secondary_header={}",
            self.partitions.len(),
            self.first_usable_lba,
            self.last_usable_lba,
            self.secondary_header_lba
        );
    }

    fn build_partition_array(&self) -> Vec<u8> {
        let n = self.partitions.len();
        let mut bytes = vec![0u8; (PARTITION_ENTRY_SLOT_SIZE as usize) * n];
        for (i, p) in self.partitions.iter().enumerate() {
            let entry = GptPartitionEntry::new(
                p.partition_type,
                p.partition_id,
                p.starting_lba,
                p.ending_lba,
                &p.name,
            );
            let slot_start = i * PARTITION_ENTRY_SLOT_SIZE as usize;
            bytes[slot_start..slot_start + GPT_PARTITION_ENTRY_SIZE]
                .copy_from_slice(&entry.to_bytes());
        }
        bytes
    }

    fn header_template(&self, partition_array_crc32: u32) -> GptHeader {
        GptHeader {
            my_lba: 1,
            alternate_lba: self.secondary_header_lba,
            first_usable_lba: self.first_usable_lba,
            last_usable_lba: self.last_usable_lba,
            disk_guid: self.disk_guid,
            partition_entry_lba: self.partition_table_lba,
            num_partition_entries: self.partitions.len() as u32,
            partition_entry_size: PARTITION_ENTRY_SLOT_SIZE as u32,
            partition_entry_array_crc32,
            header_crc32: 0,
        }
    }

    fn write_sector_at(file: &mut File, lba: u64, bytes: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(lba * SECTOR_SIZE))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn write_header_sector(file: &mut File, lba: u64, header: &GptHeader) -> Result<()> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[..GPT_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Self::write_sector_at(file, lba, &sector)
    }

    /// Writes the protective MBR, primary GPT structures, and their backup
    /// copies to the output file, then truncates/extends it to its full
    /// computed size.
    pub fn create_disk(&mut self) -> Result<()> {
        if self.state == GptState::Unconfigured {
            return Err(DiskImageError::SequenceError(
                "create_disk called before configure_disk",
            ));
        }

        info!(
            "create_disk: writing {} partitions to {:?} ({} total sectors)",
            self.partitions.len(),
            self.path,
            self.total_sectors
        );

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&self.path)?;

        // 1. Protective MBR at LBA 0.
        let mbr = protective_mbr(self.total_sectors);
        debug_assert_eq!(mbr.len(), MBR_SIZE);
        Self::write_sector_at(&mut file, 0, &mbr)?;

        // 2 & 3. Partition array CRC32, then primary header + array.
        let partition_array = self.build_partition_array();
        let partition_array_crc32 = crc32fast::hash(&partition_array);

        let primary_header = self.header_template(partition_array_crc32).with_crc32();
        Self::write_header_sector(&mut file, 1, &primary_header)?;
        Self::write_sector_at(&mut file, self.partition_table_lba, &partition_array)?;

        // 4. Backup partition array, byte-identical to the primary.
        Self::write_sector_at(&mut file, self.backup_partition_table_lba, &partition_array)?;

        // 5. Secondary GPT header, MyLBA/AlternateLBA swapped.
        let mut secondary_header = self.header_template(partition_array_crc32);
        secondary_header.my_lba = self.secondary_header_lba;
        secondary_header.alternate_lba = 1;
        secondary_header.partition_entry_lba = self.backup_partition_table_lba;
        let secondary_header = secondary_header.with_crc32();
        Self::write_header_sector(&mut file, self.secondary_header_lba, &secondary_header)?;

        file.set_len(self.total_sectors * SECTOR_SIZE)?;
        file.flush()?;

        self.state = GptState::Written;
        Ok(())
    }

    /// Looks up a placed partition by name. Only answers in the `Written`
    /// state, matching the reference implementation.
    pub fn get_partition(&self, name: &str) -> Option<PlacedPartition> {
        if self.state != GptState::Written {
            return None;
        }
        self.partitions.iter().find(|p| p.name == name).cloned()
    }

    pub fn disk_size_bytes(&self) -> Option<u64> {
        if self.state == GptState::Unconfigured {
            None
        } else {
            Some(self.total_sectors * SECTOR_SIZE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::partition_type;
    use std::io::Read;
    use tempfile::NamedTempFile;

    fn read_sector(file: &mut File, lba: u64) -> [u8; SECTOR_SIZE as usize] {
        let mut buf = [0u8; SECTOR_SIZE as usize];
        file.seek(SeekFrom::Start(lba * SECTOR_SIZE)).unwrap();
        file.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn configure_then_create_then_lookup() {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = GptDisk::new(tmp.path());

        let configs = vec![ConfiguredPartition {
            partition_type: partition_type::efi_system(),
            lba_count: 1_048_576, // 512 MiB worth of sectors
            name: "EFI".to_string(),
        }];
        disk.configure_disk(&configs);
        assert!(disk.get_partition("EFI").is_none()); // not yet Written

        disk.create_disk().unwrap();
        let placed = disk.get_partition("EFI").expect("partition placed");
        assert_eq!(placed.ending_lba, placed.starting_lba + placed.lba_count - 1);
        assert!(disk.get_partition("missing").is_none());
    }

    #[test]
    fn primary_and_backup_headers_agree_and_verify() {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = GptDisk::new(tmp.path());
        disk.configure_disk(&[ConfiguredPartition {
            partition_type: partition_type::efi_system(),
            lba_count: 2048,
            name: "A".to_string(),
        }]);
        disk.create_disk().unwrap();

        let mut file = File::open(tmp.path()).unwrap();
        let primary = read_sector(&mut file, 1);
        let secondary = read_sector(&mut file, disk.secondary_header_lba);

        assert_eq!(&primary[0..8], b"EFI PART");
        assert_eq!(&secondary[0..8], b"EFI PART");

        let primary_crc =
            u32::from_le_bytes(primary[88..92].try_into().unwrap());
        let secondary_crc =
            u32::from_le_bytes(secondary[88..92].try_into().unwrap());
        assert_eq!(primary_crc, secondary_crc);

        let mut zeroed = primary;
        zeroed[16..20].copy_from_slice(&[0, 0, 0, 0]);
        let recomputed = crc32fast::hash(&zeroed);
        let stored = u32::from_le_bytes(primary[16..20].try_into().unwrap());
        assert_eq!(stored, recomputed);
    }

    #[test]
    fn create_disk_before_configure_errors() {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = GptDisk::new(tmp.path());
        assert!(disk.create_disk().is_err());
    }
}
