//! FAT32 filesystem authoring: BPB/FSInfo, directory entries (short names
//! and VFAT long-name chains), and the in-memory tree used to place them.

mod bpb;
mod datetime;
mod dirent;
mod tree;
mod volume;

pub use bpb::{FAT32_EOC_MARK, FAT32_MIN_CLUSTER_COUNT};
pub use dirent::{get_short_name, short_name_checksum};
pub use volume::Fat32Volume;
