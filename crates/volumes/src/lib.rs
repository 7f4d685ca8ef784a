// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Block volume inventory and scoped mount APIs

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use snafu::Snafu;
use uuid::Uuid;

pub mod inventory;
pub mod mount;
pub mod mounts;

pub use inventory::{BlockDevice, Inventory, SysInventory};
pub use mount::MountScope;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("from io: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("failed to mount {device:?}: {source}"))]
    MountFailed { device: PathBuf, source: nix::Error },
}

/// GPT partition type of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// EFI System Partition
    Esp,
    /// Microsoft Basic Data Partition
    BasicData,
    /// Some other typed GPT partition
    Other,
    /// No partition table information available
    Unknown,
}

/// A single block volume, usually partition-backed.
///
/// Everything except the mount point is answered from the enumeration
/// snapshot, without mounting. The mount point is interior-mutable as a
/// [`MountScope`] populates and clears it over its lifetime.
#[derive(Debug)]
pub struct Volume {
    id: String,
    partition_kind: PartitionKind,
    partition_uuid: Uuid,
    partition_number: u32,
    partition_start: u64,
    size: u64,
    filesystem_type: String,
    is_internal: bool,
    mount_point: RefCell<Option<PathBuf>>,
}

impl Volume {
    pub fn new(id: impl Into<String>, partition_kind: PartitionKind) -> Self {
        Self {
            id: id.into(),
            partition_kind,
            partition_uuid: Uuid::nil(),
            partition_number: 0,
            partition_start: 0,
            size: 0,
            filesystem_type: String::new(),
            is_internal: false,
            mount_point: RefCell::new(None),
        }
    }

    /// Synthetic volume rooted at an existing directory, i.e. already mounted
    pub fn new_for_mount_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let volume = Self::new(path.to_string_lossy(), PartitionKind::Esp).with_filesystem_type("vfat");
        *volume.mount_point.borrow_mut() = Some(path);
        volume
    }

    /// With the given unique partition GUID
    pub fn with_partition_uuid(self, partition_uuid: Uuid) -> Self {
        Self { partition_uuid, ..self }
    }

    /// With the given 1-based partition number
    pub fn with_partition_number(self, partition_number: u32) -> Self {
        Self {
            partition_number,
            ..self
        }
    }

    /// With the given partition start offset in bytes
    pub fn with_partition_start(self, partition_start: u64) -> Self {
        Self {
            partition_start,
            ..self
        }
    }

    /// With the given size in bytes
    pub fn with_size(self, size: u64) -> Self {
        Self { size, ..self }
    }

    /// With the given filesystem identity, e.g. `vfat`
    pub fn with_filesystem_type(self, filesystem_type: impl Into<String>) -> Self {
        Self {
            filesystem_type: filesystem_type.into(),
            ..self
        }
    }

    /// With the internal (non-removable) marker
    pub fn with_internal(self, is_internal: bool) -> Self {
        Self { is_internal, ..self }
    }

    /// With a pre-existing mount point
    pub fn with_mount_point(self, mount_point: impl Into<PathBuf>) -> Self {
        *self.mount_point.borrow_mut() = Some(mount_point.into());
        self
    }

    /// Stable identifier within one inventory snapshot; the `/dev` node path
    /// for real volumes
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn partition_kind(&self) -> PartitionKind {
        self.partition_kind
    }

    pub fn partition_uuid(&self) -> Uuid {
        self.partition_uuid
    }

    pub fn partition_number(&self) -> u32 {
        self.partition_number
    }

    /// Partition start offset in bytes
    pub fn partition_start(&self) -> u64 {
        self.partition_start
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn filesystem_type(&self) -> &str {
        &self.filesystem_type
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn mount_point(&self) -> Option<PathBuf> {
        self.mount_point.borrow().clone()
    }

    pub(crate) fn set_mount_point(&self, mount_point: Option<PathBuf>) {
        *self.mount_point.borrow_mut() = mount_point;
    }

    /// The `/dev` node backing this volume
    pub fn device_path(&self) -> &Path {
        Path::new(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_builder() {
        let volume = Volume::new("/dev/sda1", PartitionKind::Esp)
            .with_size(512 * 1024 * 1024)
            .with_filesystem_type("vfat")
            .with_internal(true);
        assert_eq!(volume.id(), "/dev/sda1");
        assert_eq!(volume.partition_kind(), PartitionKind::Esp);
        assert_eq!(volume.size(), 512 * 1024 * 1024);
        assert_eq!(volume.filesystem_type(), "vfat");
        assert!(volume.is_internal());
        assert!(volume.mount_point().is_none());
    }

    #[test]
    fn synthetic_volume_is_premounted() {
        let volume = Volume::new_for_mount_path("/tmp/esp");
        assert_eq!(volume.id(), "/tmp/esp");
        assert_eq!(volume.partition_kind(), PartitionKind::Esp);
        assert_eq!(volume.filesystem_type(), "vfat");
        assert_eq!(volume.mount_point(), Some(PathBuf::from("/tmp/esp")));
        assert!(volume.partition_uuid().is_nil());
    }
}
