//! FAT32 volume authoring: formats a region of the output file as FAT32,
//! then populates it with directories and files from the manifest.
//!
//! All writes go through a single memory map over the partition's byte
//! range, opened by [`Fat32Volume::open_filesystem`] and flushed by
//! [`Fat32Volume::close_filesystem`] — mirroring the reference
//! implementation's `openFilesystem`/`closeFilesystem` pair.

use std::fs::OpenOptions;
use std::path::Path;

use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};

use crate::error::{DiskImageError, Result};
use crate::fat32::bpb::{
    BiosParameterBlock, FsInfo, BYTES_PER_SECTOR, FAT32_EOC_MARK, FAT32_MIN_CLUSTER_COUNT,
    FREE_CLUSTER_MARK, ROOT_CLUSTER,
};
use crate::fat32::dirent::{
    build_long_name_chain, get_short_name, DirEntry, ATTR_ARCHIVE, ATTR_DIRECTORY, DIR_ENTRY_SIZE,
};
use crate::fat32::datetime;
use crate::fat32::tree::{split_path, DirNode};

/// A FAT32 filesystem occupying one byte range of the output disk image.
pub struct Fat32Volume {
    path: std::path::PathBuf,
    partition_offset: u64,
    partition_size: u64,
    bpb: BiosParameterBlock,
    fsinfo: FsInfo,
    root: DirNode,
    next_free_cluster: u32,
    total_clusters: u32,
    mmap: Option<MmapMut>,
}

impl Fat32Volume {
    /// Lays out and writes the BPB, FSInfo, and both FAT copies for a fresh
    /// FAT32 filesystem spanning `partition_size` bytes starting at
    /// `partition_offset` within the file at `path`. The root directory is
    /// given its own single-cluster chain, per convention cluster 2.
    pub fn create_filesystem(
        path: impl AsRef<Path>,
        partition_offset: u64,
        partition_size: u64,
    ) -> Result<Self> {
        let total_sectors = partition_size / BYTES_PER_SECTOR as u64;
        let bpb = BiosParameterBlock::new(total_sectors, 0xFEED_FACE);

        let total_clusters = bpb.cluster_count();
        if total_clusters < FAT32_MIN_CLUSTER_COUNT {
            return Err(DiskImageError::PartitionTooSmall(partition_size));
        }

        info!(
            "create_filesystem: {} clusters of {} bytes, fat size {} sectors",
            total_clusters,
            bpb.bytes_per_cluster(),
            bpb.fat_size_32
        );

        let mut volume = Fat32Volume {
            path: path.as_ref().to_path_buf(),
            partition_offset,
            partition_size,
            bpb,
            fsinfo: FsInfo::new(),
            root: DirNode::new_root(ROOT_CLUSTER),
            next_free_cluster: ROOT_CLUSTER + 1,
            total_clusters,
            mmap: None,
        };

        volume.write_boot_region()?;
        volume.extend_file_to_partition_end()?;
        volume.open_filesystem()?;
        volume.mark_fat_entry(0, 0x0FFF_FFF8);
        volume.mark_fat_entry(1, FAT32_EOC_MARK);
        volume.mark_fat_entry(ROOT_CLUSTER, FAT32_EOC_MARK);
        volume.zero_cluster(ROOT_CLUSTER)?;
        volume.close_filesystem()?;

        Ok(volume)
    }

    fn write_boot_region(&self) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        use std::io::{Seek, SeekFrom, Write};

        let bpb_bytes = self.bpb.to_bytes();
        let fsinfo_bytes = self.fsinfo.to_bytes();

        let write_sector = |file: &mut std::fs::File, sector: u16, bytes: &[u8]| -> Result<()> {
            let offset = self.partition_offset + sector as u64 * BYTES_PER_SECTOR as u64;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(bytes)?;
            Ok(())
        };

        write_sector(&mut file, 0, &bpb_bytes)?;
        write_sector(&mut file, self.bpb.fs_info_sector, &fsinfo_bytes)?;
        write_sector(&mut file, self.bpb.backup_boot_sector, &bpb_bytes)?;
        write_sector(&mut file, self.bpb.backup_boot_sector + self.bpb.fs_info_sector, &fsinfo_bytes)?;
        Ok(())
    }

    /// Writes a single zero byte at the partition's last byte, extending the
    /// backing file if it is not already that long (a no-op once the GPT
    /// stage has already sized the whole-disk file).
    fn extend_file_to_partition_end(&self) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let last_byte = self.partition_offset + self.partition_size - 1;
        file.seek(SeekFrom::Start(last_byte))?;
        file.write_all(&[0u8])?;
        Ok(())
    }

    /// Maps the partition's byte range for in-place editing.
    pub fn open_filesystem(&mut self) -> Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mmap = unsafe {
            MmapOptions::new()
                .offset(self.partition_offset)
                .len(self.partition_size as usize)
                .map_mut(&file)?
        };
        self.mmap = Some(mmap);
        Ok(())
    }

    /// Flushes the memory map to disk and releases it, after stamping
    /// FSInfo's free-cluster accounting in both copies.
    pub fn close_filesystem(&mut self) -> Result<()> {
        if self.mmap.is_some() {
            self.stamp_fsinfo()?;
        }
        if let Some(mmap) = self.mmap.as_ref() {
            mmap.flush()?;
        }
        self.mmap = None;
        Ok(())
    }

    fn stamp_fsinfo(&mut self) -> Result<()> {
        let consumed = self.next_free_cluster - ROOT_CLUSTER;
        self.fsinfo.free_count = self.total_clusters.saturating_sub(consumed);
        self.fsinfo.next_free = self.next_free_cluster;
        let bytes = self.fsinfo.to_bytes();

        let primary_offset = self.bpb.fs_info_sector as usize * BYTES_PER_SECTOR as usize;
        let backup_offset =
            (self.bpb.backup_boot_sector + self.bpb.fs_info_sector) as usize * BYTES_PER_SECTOR as usize;

        let mmap = self.mmap_mut()?;
        mmap[primary_offset..primary_offset + bytes.len()].copy_from_slice(&bytes);
        mmap[backup_offset..backup_offset + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    fn mmap_mut(&mut self) -> Result<&mut MmapMut> {
        self.mmap
            .as_mut()
            .ok_or(DiskImageError::SequenceError("filesystem is not open"))
    }

    fn fat_entry_byte_offset(&self, fat_index: u8, cluster: u32) -> usize {
        self.bpb.fat_start_sector(fat_index) as usize * BYTES_PER_SECTOR as usize
            + cluster as usize * 4
    }

    fn mark_fat_entry(&mut self, cluster: u32, value: u32) {
        let offsets: Vec<usize> = (0..self.bpb.num_fats)
            .map(|i| self.fat_entry_byte_offset(i, cluster))
            .collect();
        let mmap = self.mmap.as_mut().expect("fat write requires an open map");
        for offset in offsets {
            mmap[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn read_fat_entry(&self, cluster: u32) -> u32 {
        let offset = self.fat_entry_byte_offset(0, cluster);
        let mmap = self.mmap.as_ref().expect("fat read requires an open map");
        u32::from_le_bytes(mmap[offset..offset + 4].try_into().unwrap())
    }

    fn cluster_byte_offset(&self, cluster: u32) -> usize {
        self.bpb.data_start_sector() as usize * BYTES_PER_SECTOR as usize
            + (cluster - ROOT_CLUSTER) as usize * self.bpb.bytes_per_cluster() as usize
    }

    fn zero_cluster(&mut self, cluster: u32) -> Result<()> {
        let offset = self.cluster_byte_offset(cluster);
        let len = self.bpb.bytes_per_cluster() as usize;
        let mmap = self.mmap_mut()?;
        mmap[offset..offset + len].fill(0);
        Ok(())
    }

    /// Allocates `count` free clusters, chaining them to `prev_tail` (the
    /// last cluster of an existing chain) if given, and marks the new
    /// chain's own tail as end-of-chain. Returns the allocated clusters in
    /// order.
    fn allocate_clusters(&mut self, prev_tail: Option<u32>, count: u32) -> Result<Vec<u32>> {
        if self.next_free_cluster + count > self.total_clusters + ROOT_CLUSTER {
            return Err(DiskImageError::ClusterExhausted {
                requested: count,
                free: self.total_clusters + ROOT_CLUSTER - self.next_free_cluster,
            });
        }

        let clusters: Vec<u32> = (self.next_free_cluster..self.next_free_cluster + count).collect();
        self.next_free_cluster += count;

        let mut previous = prev_tail;
        for &cluster in &clusters {
            if let Some(prev) = previous {
                self.mark_fat_entry(prev, cluster);
            }
            self.mark_fat_entry(cluster, FAT32_EOC_MARK);
            self.zero_cluster(cluster)?;
            previous = Some(cluster);
        }

        debug!("allocate_clusters: {:?} (prev_tail={:?})", clusters, prev_tail);
        Ok(clusters)
    }

    fn entries_per_cluster(&self) -> usize {
        self.bpb.bytes_per_cluster() as usize / DIR_ENTRY_SIZE
    }

    /// Writes `entries` into the directory chain starting at `first_cluster`,
    /// allocating and chaining additional clusters as needed.
    fn write_directory_entries(
        &mut self,
        first_cluster: u32,
        existing_entry_count: u32,
        entries: &[[u8; DIR_ENTRY_SIZE]],
    ) -> Result<()> {
        let per_cluster = self.entries_per_cluster() as u32;
        let mut cluster = first_cluster;
        let mut index = existing_entry_count;

        // A directory always has at least one allocated cluster (created
        // alongside the directory itself). When `existing_entry_count` is an
        // exact multiple of `per_cluster`, that many clusters are full and
        // no further cluster has been allocated yet.
        let mut allocated_clusters = if existing_entry_count == 0 {
            1
        } else {
            existing_entry_count.div_ceil(per_cluster)
        };

        // Walk the existing chain out to the cluster holding `index`,
        // without stepping onto a cluster that isn't allocated yet.
        let walk_steps = (index / per_cluster).min(allocated_clusters - 1);
        for _ in 0..walk_steps {
            cluster = self.read_fat_entry(cluster);
        }

        for entry in entries {
            let ordinal = index / per_cluster;
            let slot_in_cluster = index % per_cluster;
            if slot_in_cluster == 0 && ordinal >= allocated_clusters {
                let tail = self.last_cluster_of(cluster);
                cluster = self.allocate_clusters(Some(tail), 1)?[0];
                allocated_clusters += 1;
            }
            let offset = self.cluster_byte_offset(cluster) + slot_in_cluster as usize * DIR_ENTRY_SIZE;
            let mmap = self.mmap_mut()?;
            mmap[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(entry);
            index += 1;
        }

        Ok(())
    }

    fn last_cluster_of(&self, start: u32) -> u32 {
        let mut cluster = start;
        loop {
            let next = self.read_fat_entry(cluster);
            if next >= FAT32_EOC_MARK || next == FREE_CLUSTER_MARK {
                return cluster;
            }
            cluster = next;
        }
    }

    fn count_entries_in_chain(&self, start: u32) -> u32 {
        let per_cluster = self.entries_per_cluster() as u32;
        let mut cluster = start;
        let mut count = 0;
        loop {
            let base = self.cluster_byte_offset(cluster);
            let mmap = self.mmap.as_ref().expect("directory scan requires an open map");
            for slot in 0..per_cluster {
                let offset = base + slot as usize * DIR_ENTRY_SIZE;
                let bytes: [u8; DIR_ENTRY_SIZE] = mmap[offset..offset + DIR_ENTRY_SIZE].try_into().unwrap();
                if DirEntry::is_free(&bytes) {
                    return count;
                }
                count += 1;
            }
            let next = self.read_fat_entry(cluster);
            if next >= FAT32_EOC_MARK {
                return count;
            }
            cluster = next;
        }
    }

    fn build_entries_for(&self, name: &str, attributes: u8, first_cluster: u32, file_size: u32) -> Vec<[u8; DIR_ENTRY_SIZE]> {
        let short_name = get_short_name(name);
        let canonical = canonical_short_form(&short_name);
        let mut entries = Vec::new();
        if canonical != name.to_uppercase() {
            entries.extend(build_long_name_chain(name, &short_name));
        }
        let dt = datetime::now();
        entries.push(DirEntry {
            short_name,
            attributes,
            created: clone_datetime(&dt),
            written: dt,
            first_cluster,
            file_size,
        }.to_bytes());
        entries
    }

    /// Creates a directory at an absolute path. Every path component up to
    /// the last must already exist; only the final component is created.
    pub fn create_directory(&mut self, abs_path: &str) -> Result<()> {
        let components = split_path(abs_path);
        if components.is_empty() {
            return Err(DiskImageError::PathLookupFailed(abs_path.to_string()));
        }
        let (parent_components, name) = components.split_at(components.len() - 1);
        let name = name[0];

        let (parent, rest) = self.root.resolve(parent_components);
        if !rest.is_empty() {
            return Err(DiskImageError::PathLookupFailed(abs_path.to_string()));
        }
        let parent_cluster = parent.cluster;
        let parent_count = self.count_entries_in_chain(parent_cluster);

        let new_cluster = self.allocate_clusters(None, 1)?[0];

        let entries = self.build_entries_for(name, ATTR_DIRECTORY, new_cluster, 0);
        self.write_directory_entries(parent_cluster, parent_count, &entries)?;

        self.write_dot_entries(new_cluster, parent_cluster)?;

        let (parent_mut, _) = self.root.resolve_mut(parent_components);
        parent_mut.insert_child(name, new_cluster);

        info!("create_directory: {} -> cluster {}", abs_path, new_cluster);
        Ok(())
    }

    fn write_dot_entries(&mut self, cluster: u32, parent_cluster: u32) -> Result<()> {
        let dt = datetime::now();

        let mut dot_name = [b' '; 11];
        dot_name[0] = b'.';
        let dot = DirEntry {
            short_name: dot_name,
            attributes: ATTR_DIRECTORY,
            created: clone_datetime(&dt),
            written: clone_datetime(&dt),
            first_cluster: cluster,
            file_size: 0,
        };

        let mut dotdot_name = [b' '; 11];
        dotdot_name[0] = b'.';
        dotdot_name[1] = b'.';
        // FAT32's root has no ".." target; convention points it back at
        // cluster 0, not at itself.
        let dotdot_target = if parent_cluster == ROOT_CLUSTER { 0 } else { parent_cluster };
        let dotdot = DirEntry {
            short_name: dotdot_name,
            attributes: ATTR_DIRECTORY,
            created: clone_datetime(&dt),
            written: dt,
            first_cluster: dotdot_target,
            file_size: 0,
        };
        self.write_directory_entries(cluster, 0, &[dot.to_bytes(), dotdot.to_bytes()])?;
        Ok(())
    }

    /// Copies the file at `src_path` into the volume at absolute path
    /// `abs_dst`. The destination's parent directory must already exist.
    pub fn create_file(&mut self, abs_dst: &str, src_path: impl AsRef<Path>) -> Result<()> {
        let components = split_path(abs_dst);
        if components.is_empty() {
            return Err(DiskImageError::PathLookupFailed(abs_dst.to_string()));
        }
        let (parent_components, name) = components.split_at(components.len() - 1);
        let name = name[0];

        let (parent, rest) = self.root.resolve(parent_components);
        if !rest.is_empty() {
            return Err(DiskImageError::PathLookupFailed(abs_dst.to_string()));
        }
        let parent_cluster = parent.cluster;
        let parent_count = self.count_entries_in_chain(parent_cluster);

        let data = std::fs::read(src_path.as_ref())?;
        let file_size: u32 = data
            .len()
            .try_into()
            .map_err(|_| DiskImageError::FileTooLarge(data.len() as u64))?;

        let first_cluster = if data.is_empty() {
            0
        } else {
            let bytes_per_cluster = self.bpb.bytes_per_cluster() as usize;
            let cluster_count = (data.len()).div_ceil(bytes_per_cluster) as u32;
            let clusters = self.allocate_clusters(None, cluster_count)?;
            for (i, cluster) in clusters.iter().enumerate() {
                let start = i * bytes_per_cluster;
                let end = ((i + 1) * bytes_per_cluster).min(data.len());
                let offset = self.cluster_byte_offset(*cluster);
                let mmap = self.mmap_mut()?;
                mmap[offset..offset + (end - start)].copy_from_slice(&data[start..end]);
            }
            clusters[0]
        };

        let entries = self.build_entries_for(name, ATTR_ARCHIVE, first_cluster, file_size);
        self.write_directory_entries(parent_cluster, parent_count, &entries)?;

        info!("create_file: {} ({} bytes)", abs_dst, file_size);
        Ok(())
    }
}

fn canonical_short_form(short_name: &[u8; 11]) -> String {
    let base = String::from_utf8_lossy(&short_name[0..8]).trim_end().to_string();
    let ext = String::from_utf8_lossy(&short_name[8..11]).trim_end().to_string();
    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

fn clone_datetime(dt: &datetime::FatDateTime) -> datetime::FatDateTime {
    datetime::FatDateTime {
        year: dt.year,
        month: dt.month,
        day: dt.day,
        hour: dt.hour,
        minute: dt.minute,
        second: dt.second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_volume(size_bytes: u64) -> Fat32Volume {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(size_bytes).unwrap();
        Fat32Volume::create_filesystem(tmp.path(), 0, size_bytes).unwrap()
    }

    #[test]
    fn rejects_volumes_below_fat32_minimum_cluster_count() {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(16 * 1024 * 1024).unwrap();
        let result = Fat32Volume::create_filesystem(tmp.path(), 0, 16 * 1024 * 1024);
        assert!(result.is_err());
    }

    #[test]
    fn create_directory_then_nested_directory() {
        let mut vol = make_volume(512 * 1024 * 1024);
        vol.open_filesystem().unwrap();
        vol.create_directory("/a").unwrap();
        vol.create_directory("/a/b").unwrap();
        vol.close_filesystem().unwrap();

        let (node, rest) = vol.root.resolve(&["a", "b"]);
        assert!(rest.is_empty());
        assert_eq!(node.name, "b");
    }

    #[test]
    fn create_directory_with_missing_parent_fails() {
        let mut vol = make_volume(512 * 1024 * 1024);
        vol.open_filesystem().unwrap();
        let result = vol.create_directory("/missing/child");
        assert!(result.is_err());
    }

    #[test]
    fn create_file_writes_into_allocated_clusters() {
        let mut vol = make_volume(512 * 1024 * 1024);
        vol.open_filesystem().unwrap();

        let mut src = NamedTempFile::new().unwrap();
        use std::io::Write;
        src.write_all(b"hello world").unwrap();

        vol.create_file("/hello.txt", src.path()).unwrap();
        vol.close_filesystem().unwrap();

        assert_eq!(vol.root.children.len(), 0); // files aren't tracked in the tree
    }

    #[test]
    fn file_of_exactly_one_cluster_allocates_a_single_eoc_cluster() {
        let mut vol = make_volume(512 * 1024 * 1024);
        vol.open_filesystem().unwrap();

        let cluster_size = vol.bpb.bytes_per_cluster() as usize;
        let mut src = NamedTempFile::new().unwrap();
        use std::io::Write;
        src.write_all(&vec![0xAB; cluster_size]).unwrap();

        vol.create_file("/one_cluster.bin", src.path()).unwrap();

        // The allocator hands out clusters sequentially starting at 3 for a
        // fresh volume whose only prior consumer is the root directory.
        let first = 3;
        assert_eq!(vol.read_fat_entry(first), FAT32_EOC_MARK);

        vol.close_filesystem().unwrap();
    }

    #[test]
    fn file_of_cluster_plus_one_byte_allocates_two_chained_clusters() {
        let mut vol = make_volume(512 * 1024 * 1024);
        vol.open_filesystem().unwrap();

        let cluster_size = vol.bpb.bytes_per_cluster() as usize;
        let mut src = NamedTempFile::new().unwrap();
        use std::io::Write;
        src.write_all(&vec![0xCD; cluster_size + 1]).unwrap();

        vol.create_file("/cluster_plus_one.bin", src.path()).unwrap();

        let first = 3;
        let second = vol.read_fat_entry(first);
        assert_eq!(second, first + 1);
        assert_eq!(vol.read_fat_entry(second), FAT32_EOC_MARK);

        let offset = vol.cluster_byte_offset(second);
        let mmap = vol.mmap_mut().unwrap();
        assert_eq!(mmap[offset], 0xCD);

        vol.close_filesystem().unwrap();
    }

    #[test]
    fn directory_entries_exactly_filling_a_cluster_then_one_more() {
        // Regression test: a directory whose entry count lands exactly on
        // a cluster boundary must allocate a fresh cluster for the next
        // entry rather than walking off the end of the FAT chain.
        let mut vol = make_volume(200 * 1024 * 1024);
        vol.open_filesystem().unwrap();

        let per_cluster = vol.entries_per_cluster();
        for i in 0..per_cluster {
            vol.create_directory(&format!("/d{i}")).unwrap();
        }
        // One more, past the boundary: must not panic.
        vol.create_directory(&format!("/d{per_cluster}")).unwrap();

        let root_cluster = ROOT_CLUSTER;
        assert_eq!(vol.count_entries_in_chain(root_cluster) as usize, per_cluster + 1);

        vol.close_filesystem().unwrap();
    }
}
