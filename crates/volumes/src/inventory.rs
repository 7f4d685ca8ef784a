// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Volume enumeration from sysfs, GPT and superblocks

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use fs_err as fs;
use snafu::ResultExt as _;
use superblock::Superblock;
use uuid::Uuid;

use crate::{mounts::Table, IoSnafu, PartitionKind, Volume};

/// A block device as seen by the mediator, partition or whole disk
#[derive(Debug, Clone)]
pub struct BlockDevice {
    /// The `/dev` node
    pub device: PathBuf,
    /// Filesystem or container identity, e.g. `vfat`, `crypto_LUKS`, `BitLocker`
    pub id_type: String,
    /// Filesystem label, if any
    pub id_label: Option<String>,
}

/// Source of volumes and raw block devices
pub trait Inventory {
    /// All partition volumes of the given kind, in stable device order
    fn volumes_by_kind(&self, kind: PartitionKind) -> Result<Vec<Rc<Volume>>, crate::Error>;

    /// Every block device, used for FDE detection and as a liveness probe
    fn block_devices(&self) -> Result<Vec<BlockDevice>, crate::Error>;
}

/// Inventory backed by the live system
#[derive(Debug)]
pub struct SysInventory {
    /// location of /sys
    sysfs: PathBuf,

    /// location of /dev
    devfs: PathBuf,

    /// location of /proc
    procfs: PathBuf,
}

impl Default for SysInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl SysInventory {
    pub fn new() -> Self {
        Self::with_roots("/sys", "/dev", "/proc")
    }

    /// With explicit filesystem roots, for tests
    pub fn with_roots(sysfs: impl Into<PathBuf>, devfs: impl Into<PathBuf>, procfs: impl Into<PathBuf>) -> Self {
        Self {
            sysfs: sysfs.into(),
            devfs: devfs.into(),
            procfs: procfs.into(),
        }
    }

    /// Sorted entries of `/sys/class/block`
    fn block_class_entries(&self) -> Result<Vec<std::ffi::OsString>, crate::Error> {
        let class_dir = self.sysfs.join("class").join("block");
        let mut names = fs::read_dir(&class_dir)
            .context(IoSnafu)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn scan_partitions(&self) -> Result<Vec<Rc<Volume>>, crate::Error> {
        let mounts = Table::new_from_path(self.procfs.join("self").join("mounts")).context(IoSnafu)?;
        let mut volumes = vec![];

        for name in self.block_class_entries()? {
            let sys_path = match fs::canonicalize(self.sysfs.join("class").join("block").join(&name)) {
                Ok(path) => path,
                Err(_) => continue,
            };
            if !sys_path.join("partition").exists() {
                continue;
            }

            let Some(number) = read_sysfs_u64(&sys_path.join("partition")) else {
                continue;
            };
            let start = read_sysfs_u64(&sys_path.join("start")).unwrap_or_default() * 512;
            let size = read_sysfs_u64(&sys_path.join("size")).unwrap_or_default() * 512;

            // partitions sit below their disk in the device tree
            let Some(parent) = sys_path.parent().and_then(|p| p.file_name()) else {
                continue;
            };
            if parent == "block" {
                continue;
            }
            let parent_sys = sys_path.parent().expect("parent checked above");
            let is_internal = read_sysfs_u64(&parent_sys.join("removable")) == Some(0);

            let device = self.devfs.join(&name);
            let parent_device = self.devfs.join(parent);
            let (kind, partition_uuid) = self.gpt_metadata(&parent_device, number as u32);

            let mut volume = Volume::new(device.to_string_lossy(), kind)
                .with_partition_uuid(partition_uuid)
                .with_partition_number(number as u32)
                .with_partition_start(start)
                .with_size(size)
                .with_filesystem_type(self.identify(&device).unwrap_or_default())
                .with_internal(is_internal);
            if let Some(mountpoint) = mounts.mountpoint_for_device(&device) {
                volume = volume.with_mount_point(mountpoint);
            }
            volumes.push(Rc::new(volume));
        }

        Ok(volumes)
    }

    /// Partition kind and unique GUID from the parent disk's GPT
    fn gpt_metadata(&self, parent_device: &Path, number: u32) -> (PartitionKind, Uuid) {
        let Ok(fi) = fs::File::open(parent_device) else {
            return (PartitionKind::Unknown, Uuid::nil());
        };
        let header = match gpt::GptConfig::new().writable(false).open_from_device(Box::new(fi)) {
            Ok(header) => header,
            Err(error) => {
                log::trace!("no GPT on {}: {error}", parent_device.display());
                return (PartitionKind::Unknown, Uuid::nil());
            }
        };
        let Some(partition) = header.partitions().get(&number) else {
            return (PartitionKind::Unknown, Uuid::nil());
        };
        let kind = if partition.part_type_guid == gpt::partition_types::EFI {
            PartitionKind::Esp
        } else if partition.part_type_guid == gpt::partition_types::BASIC {
            PartitionKind::BasicData
        } else {
            PartitionKind::Other
        };
        (kind, partition.part_guid)
    }

    /// Identify the filesystem on a device without mounting it
    fn identify(&self, device: &Path) -> Option<String> {
        let mut fi = fs::File::open(device).ok()?;
        match Superblock::from_reader(&mut fi) {
            Ok(sb) => {
                log::trace!("detected superblock on {}: {}", device.display(), sb.kind());
                let kind = sb.kind().to_string().to_lowercase();
                if kind.contains("fat") {
                    Some("vfat".into())
                } else if kind.contains("luks") {
                    Some("crypto_LUKS".into())
                } else {
                    Some(kind)
                }
            }
            Err(_) => identify_bitlocker(device),
        }
    }

    /// Filesystem labels from the `/dev/disk/by-label` symlink farm
    fn labels_by_device(&self) -> HashMap<PathBuf, String> {
        let mut labels = HashMap::new();
        let by_label = self.devfs.join("disk").join("by-label");
        let Ok(entries) = fs::read_dir(&by_label) else {
            return labels;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let label = entry.file_name().to_string_lossy().to_string();
            if let Ok(device) = fs::canonicalize(entry.path()) {
                labels.insert(device, label);
            }
        }
        labels
    }
}

impl Inventory for SysInventory {
    fn volumes_by_kind(&self, kind: PartitionKind) -> Result<Vec<Rc<Volume>>, crate::Error> {
        Ok(self
            .scan_partitions()?
            .into_iter()
            .filter(|v| v.partition_kind() == kind)
            .collect())
    }

    fn block_devices(&self) -> Result<Vec<BlockDevice>, crate::Error> {
        let labels = self.labels_by_device();
        let mut devices = vec![];
        for name in self.block_class_entries()? {
            let device = self.devfs.join(&name);
            let canonical = fs::canonicalize(&device).unwrap_or_else(|_| device.clone());
            devices.push(BlockDevice {
                id_type: self.identify(&device).unwrap_or_default(),
                id_label: labels.get(&canonical).cloned(),
                device,
            });
        }
        Ok(devices)
    }
}

fn read_sysfs_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// BitLocker has no superblock the probe understands; check the volume
/// header signature directly
fn identify_bitlocker(device: &Path) -> Option<String> {
    let mut fi = fs::File::open(device).ok()?;
    let mut header = [0u8; 16];
    fi.read_exact(&mut header).ok()?;
    if &header[3..11] == b"-FVE-FS-" {
        Some("BitLocker".into())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitlocker_signature() {
        let dir = std::env::temp_dir().join(format!("volumes-bitlocker-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dev");

        let mut header = vec![0xebu8, 0x58, 0x90];
        header.extend_from_slice(b"-FVE-FS-");
        header.extend_from_slice(&[0u8; 16]);
        fs::write(&path, &header).unwrap();
        assert_eq!(identify_bitlocker(&path).as_deref(), Some("BitLocker"));

        fs::write(&path, [0u8; 32]).unwrap();
        assert_eq!(identify_bitlocker(&path), None);

        fs::remove_dir_all(&dir).unwrap();
    }
}
