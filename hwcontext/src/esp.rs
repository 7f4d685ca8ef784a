// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! ESP discovery: candidate registry, classification and default election

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use fs_err as fs;
use snafu::ensure;

use volumes::{Inventory, MountScope, PartitionKind, Volume};

use crate::efipath::HardDrivePath;
use crate::{
    Context, ContextFlags, Error, MountInhibitedSnafu, NoEspElectedSnafu, NoEspOrBdpSnafu, NoLinuxBootloaderSnafu,
    NoVolumeForDevicePathSnafu, NotMountedSnafu, UserEspNotFoundSnafu,
};

/// Candidate set of volumes that could be an ESP.
///
/// Deduplicated on the volume id; populated from the inventory on the first
/// miss and cached permanently afterwards.
pub(crate) struct EspRegistry {
    volumes: Vec<Rc<Volume>>,
    path_override: Option<PathBuf>,
}

impl EspRegistry {
    pub fn new(path_override: Option<PathBuf>) -> Self {
        Self {
            volumes: vec![],
            path_override,
        }
    }

    pub fn add(&mut self, volume: Rc<Volume>) {
        if !matches!(
            volume.partition_kind(),
            PartitionKind::Esp | PartitionKind::BasicData
        ) {
            log::debug!(
                "not adding volume {} of kind {:?}",
                volume.id(),
                volume.partition_kind()
            );
            return;
        }
        if self.volumes.iter().any(|v| v.id() == volume.id()) {
            log::debug!("not adding duplicate volume {}", volume.id());
            return;
        }
        self.volumes.push(volume);
    }

    pub fn list(&mut self, inventory: &dyn Inventory) -> Result<Vec<Rc<Volume>>, Error> {
        // cached result
        if !self.volumes.is_empty() {
            return Ok(self.volumes.clone());
        }

        // for the test suite use a local directory for the ESP
        if let Some(path) = self.path_override.clone() {
            self.add(Rc::new(Volume::new_for_mount_path(path)));
            return Ok(self.volumes.clone());
        }

        // ESP
        match inventory.volumes_by_kind(PartitionKind::Esp) {
            Err(error) => log::debug!("{error}"),
            Ok(volumes) => {
                for volume in volumes {
                    if volume.filesystem_type() != "vfat" {
                        continue;
                    }
                    self.add(volume);
                }
            }
        }

        // BDP
        match inventory.volumes_by_kind(PartitionKind::BasicData) {
            Err(error) => log::debug!("{error}"),
            Ok(volumes) => {
                for volume in volumes {
                    if volume.filesystem_type() != "vfat" {
                        continue;
                    }
                    if !volume.is_internal() {
                        continue;
                    }
                    self.add(volume);
                }
            }
        }

        // nothing found: tell a dead block device service apart from a miss
        if self.volumes.is_empty() {
            inventory.block_devices()?;
            return NoEspOrBdpSnafu.fail();
        }

        Ok(self.volumes.clone())
    }
}

/// A mounted volume is an ESP when it carries an `EFI` hierarchy
fn is_esp(volume: &Volume) -> bool {
    let Some(mount_point) = volume.mount_point() else {
        return false;
    };
    mount_point.join("EFI").is_dir() || mount_point.join("efi").is_dir()
}

const LINUX_BOOTLOADER_PREFIXES: [&str; 4] = ["grub", "shim", "systemd-boot", "zfsbootmenu"];

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return vec![];
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect()
}

/// Does the volume host a Linux boot loader?
///
/// Scans the mount point and one level into the `EFI`/`efi` vendor
/// directories for the well-known loader basenames.
fn is_linux_esp(volume: &Volume) -> Result<(), Error> {
    let Some(mount_point) = volume.mount_point() else {
        return NotMountedSnafu.fail();
    };

    let mut files = files_in(&mount_point);
    for efi_dir in ["EFI", "efi"] {
        let dir = mount_point.join(efi_dir);
        if !dir.is_dir() {
            continue;
        }
        files.extend(files_in(&dir));
        for entry in fs::read_dir(&dir).into_iter().flatten().filter_map(|e| e.ok()) {
            if entry.path().is_dir() {
                files.extend(files_in(&entry.path()));
            }
        }
    }

    for file in &files {
        let Some(basename) = file.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if !basename.ends_with(".efi") {
            continue;
        }
        if LINUX_BOOTLOADER_PREFIXES.iter().any(|p| basename.starts_with(p)) {
            log::info!(
                "found {} which indicates a Linux ESP, using {}",
                file.display(),
                mount_point.display()
            );
            return Ok(());
        }
    }

    NoLinuxBootloaderSnafu {
        prefixes: LINUX_BOOTLOADER_PREFIXES.join("|"),
        path: mount_point,
    }
    .fail()
}

/// Rank one mounted candidate; higher is better
fn score_esp(volume: &Volume) -> u32 {
    // big partitions are better than small partitions
    let mut score = (volume.size() / (1024 * 1024)) as u32;

    // prefer partitions with the ESP flag set over msftdata
    if volume.partition_kind() == PartitionKind::Esp {
        score += 0x20000;
    }

    // prefer Linux ESPs
    match is_linux_esp(volume) {
        Ok(()) => score += 0x10000,
        Err(error) => log::debug!("not a Linux ESP: {error}"),
    }
    score
}

impl Context {
    /// Add a candidate ESP volume; duplicates by id are dropped
    pub fn add_esp_volume(&self, volume: Rc<Volume>) {
        self.esp_registry.borrow_mut().add(volume);
    }

    /// All volumes that could be an ESP.
    ///
    /// The result is cached, so subsequent calls are fast.
    pub fn esp_volumes(&self) -> Result<Vec<Rc<Volume>>, Error> {
        self.esp_registry.borrow_mut().list(self.inventory.as_ref())
    }

    /// Pin the ESP the user wants used
    pub fn set_esp_location(&mut self, location: impl Into<PathBuf>) {
        self.esp_location = Some(location.into());
    }

    pub fn esp_location(&self) -> Option<&Path> {
        self.esp_location.as_deref()
    }

    /// Mount a volume for a scope, unless policy forbids mounting
    pub(crate) fn mount_scope(&self, volume: &Rc<Volume>) -> Result<MountScope, Error> {
        ensure!(!self.has_flag(ContextFlags::INHIBIT_VOLUME_MOUNT), MountInhibitedSnafu);
        Ok(MountScope::acquire(volume, &self.mount_base)?)
    }

    /// Elect the ESP that plugins should nominally use for storing data.
    ///
    /// Candidates are mounted for the duration of the election only; the
    /// caller re-acquires a mount scope on the winner as needed.
    pub fn default_esp(&self) -> Result<Rc<Volume>, Error> {
        let volumes = self.esp_volumes()?;

        // no mounting
        ensure!(!self.has_flag(ContextFlags::INHIBIT_VOLUME_MOUNT), MountInhibitedSnafu);

        // more than one: look for the best
        if volumes.len() > 1 {
            let mut scored: Vec<(Rc<Volume>, u32)> = vec![];
            for esp in &volumes {
                // ignore the volume completely if we cannot mount it
                let _scope = match self.mount_scope(esp) {
                    Ok(scope) => scope,
                    Err(error) => {
                        log::warn!("failed to mount ESP: {error}");
                        continue;
                    }
                };
                if let Some(user) = self.esp_location() {
                    if esp.mount_point().as_deref() != Some(user) {
                        log::debug!(
                            "skipping {} as it's not the user specified ESP",
                            esp.id()
                        );
                        continue;
                    }
                }
                if !is_esp(esp) {
                    log::debug!("not an ESP: {}", esp.id());
                    continue;
                }
                scored.push((esp.clone(), score_esp(esp)));
            }
            ensure!(!scored.is_empty(), NoEspElectedSnafu);

            scored.sort_by_key(|(_, score)| Reverse(*score));
            let mut summary = String::from("more than one ESP possible:");
            for (esp, score) in &scored {
                summary.push_str(&format!("\n - {score:#x}:\t{}", esp.id()));
            }
            log::debug!("{summary}");
            return Ok(scored[0].0.clone());
        }

        // a single candidate is trusted, but must mount and match any pin
        let esp = volumes[0].clone();
        let _scope = self.mount_scope(&esp)?;
        if let Some(user) = self.esp_location() {
            if esp.mount_point().as_deref() != Some(user) {
                return UserEspNotFoundSnafu {
                    location: user.display().to_string(),
                }
                .fail();
            }
        }
        Ok(esp)
    }

    /// Resolve a hard-drive device path against the registered volumes
    pub fn esp_volume_by_hard_drive_device_path(&self, dp: &HardDrivePath) -> Result<Rc<Volume>, Error> {
        for volume in self.esp_volumes()? {
            let dp_tmp = match HardDrivePath::from_volume(&volume) {
                Ok(dp_tmp) => dp_tmp,
                Err(error) => {
                    log::debug!("{error}");
                    continue;
                }
            };
            if &dp_tmp == dp {
                return Ok(volume);
            }
        }
        NoVolumeForDevicePathSnafu.fail()
    }
}
