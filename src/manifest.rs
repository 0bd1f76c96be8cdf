//! JSON manifest describing the disk image to author.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::guid::{partition_type, EfiGuid};

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub output: PathBuf,
    pub partitions: Vec<PartitionConfig>,
    pub filesystems: Vec<FilesystemConfig>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest> {
        let text = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&text)?;
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionConfig {
    #[serde(rename = "type")]
    pub partition_type: PartitionType,
    /// Size in KiB; the GPT stage doubles this to get an LBA count (see
    /// `DESIGN.md` for why the on-disk arithmetic treats it as KiB).
    pub size: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionType {
    Efi,
    Bdp,
    LinuxSwap,
}

impl PartitionType {
    pub fn to_guid(self) -> EfiGuid {
        match self {
            PartitionType::Efi => partition_type::efi_system(),
            PartitionType::Bdp => partition_type::microsoft_basic_data(),
            PartitionType::LinuxSwap => partition_type::linux_swap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    pub partition: String,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    pub destination: String,
    pub source: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_full_manifest() {
        let json = r#"{
            "output": "disk.img",
            "partitions": [
                {"type": "EFI", "size": 524288, "name": "EFI"}
            ],
            "filesystems": [
                {"partition": "EFI", "directories": ["/boot"],
                 "files": [{"destination": "/boot/grub.cfg", "source": "grub.cfg"}]}
            ]
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.partitions.len(), 1);
        assert_eq!(manifest.partitions[0].size, 524_288);
        assert!(matches!(manifest.partitions[0].partition_type, PartitionType::Efi));
        assert_eq!(manifest.filesystems[0].directories, vec!["/boot".to_string()]);
    }

    #[test]
    fn rejects_unknown_partition_type_string() {
        let json = r#"{
            "output": "disk.img",
            "partitions": [{"type": "NTFS", "size": 1024, "name": "X"}],
            "filesystems": []
        }"#;
        let result: std::result::Result<Manifest, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn partition_type_maps_to_well_known_guids() {
        assert_eq!(PartitionType::Efi.to_guid(), partition_type::efi_system());
        assert_eq!(PartitionType::Bdp.to_guid(), partition_type::microsoft_basic_data());
        assert_eq!(PartitionType::LinuxSwap.to_guid(), partition_type::linux_swap());
    }
}
