// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Scoped volume mounts

use std::path::{Path, PathBuf};
use std::rc::Rc;

use fs_err as fs;
use nix::mount::{mount, umount, MsFlags};
use snafu::ResultExt as _;

use crate::{IoSnafu, MountFailedSnafu, Volume};

/// A mount held for a scope.
///
/// Acquiring a scope on an already-mounted volume is a no-op spectator: the
/// volume stays mounted when the scope drops. Otherwise the scope mounts the
/// volume and guarantees the unmount on every exit path, via [`Drop`].
#[derive(Debug)]
pub struct MountScope {
    volume: Rc<Volume>,
    mount_point: PathBuf,
    owned: bool,
}

impl MountScope {
    /// Mount `volume` under `base_dir` unless it is already mounted.
    ///
    /// The caller exclusively owns the scope until it drops.
    pub fn acquire(volume: &Rc<Volume>, base_dir: &Path) -> Result<Self, crate::Error> {
        if let Some(mount_point) = volume.mount_point() {
            log::debug!("{} already mounted on {}", volume.id(), mount_point.display());
            return Ok(Self {
                volume: volume.clone(),
                mount_point,
                owned: false,
            });
        }

        let device = volume.device_path().to_path_buf();
        let target = base_dir.join(device.file_name().unwrap_or(device.as_os_str()));
        fs::create_dir_all(&target).context(IoSnafu)?;

        let fstype = volume.filesystem_type();
        mount(
            Some(device.as_path()),
            &target,
            (!fstype.is_empty()).then_some(fstype),
            MsFlags::empty(),
            None::<&str>,
        )
        .context(MountFailedSnafu { device })?;

        log::debug!("mounted {} on {}", volume.id(), target.display());
        volume.set_mount_point(Some(target.clone()));
        Ok(Self {
            volume: volume.clone(),
            mount_point: target,
            owned: true,
        })
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn volume(&self) -> &Rc<Volume> {
        &self.volume
    }

    /// Release the scope early; equivalent to dropping it
    pub fn release(mut self) {
        self.release_impl();
    }

    fn release_impl(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        if let Err(error) = umount(&self.mount_point) {
            log::warn!("failed to unmount {}: {error}", self.mount_point.display());
            return;
        }
        self.volume.set_mount_point(None);
        if let Err(error) = fs::remove_dir(&self.mount_point) {
            log::debug!("leaving mount directory behind: {error}");
        }
    }
}

impl Drop for MountScope {
    fn drop(&mut self) {
        self.release_impl();
    }
}
