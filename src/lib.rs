//! Authors a GPT-partitioned, FAT32-populated raw disk image from a JSON
//! manifest: see [`manifest::Manifest`], [`gpt::GptDisk`], and
//! [`fat32::Fat32Volume`].

pub mod error;
pub mod fat32;
pub mod gpt;
pub mod guid;
pub mod manifest;

use log::info;

use crate::error::{DiskImageError, Result};
use crate::gpt::{ConfiguredPartition, GptDisk};
use crate::manifest::Manifest;

/// Runs the whole pipeline: lays out the GPT disk, then formats and
/// populates a FAT32 volume for every `filesystems` entry in the manifest.
pub fn author_image(manifest: &Manifest) -> Result<()> {
    let mut disk = GptDisk::new(&manifest.output);

    let configs: Vec<ConfiguredPartition> = manifest
        .partitions
        .iter()
        .map(|p| ConfiguredPartition {
            partition_type: p.partition_type.to_guid(),
            lba_count: p.size * 2,
            name: p.name.clone(),
        })
        .collect();

    disk.configure_disk(&configs);
    disk.create_disk()?;
    info!("disk layout written to {:?}", manifest.output);

    for fs in &manifest.filesystems {
        let placed = disk
            .get_partition(&fs.partition)
            .ok_or_else(|| DiskImageError::PartitionNotFound(fs.partition.clone()))?;

        let offset = placed.starting_lba * gpt::SECTOR_SIZE;
        let size = placed.lba_count * gpt::SECTOR_SIZE;

        let mut volume = fat32::Fat32Volume::create_filesystem(&manifest.output, offset, size)?;
        volume.open_filesystem()?;

        for dir in &fs.directories {
            volume
                .create_directory(dir)
                .map_err(|e| DiskImageError::DirectoryCreationFailed(Box::new(e)))?;
        }
        for file in &fs.files {
            volume
                .create_file(&file.destination, &file.source)
                .map_err(|e| DiskImageError::FileCreationFailed(Box::new(e)))?;
        }

        volume.close_filesystem()?;
        info!("populated filesystem on partition {:?}", fs.partition);
    }

    Ok(())
}
