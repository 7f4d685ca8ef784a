// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Boot-chain enumeration over the firmware boot order.
//!
//! For every `Boot####` entry the walker resolves the disk and file named
//! by its device path, then materialises the first-stage loader, the
//! shim-relative second stage and any revocation payload as parsed PE
//! images. One malformed image never aborts the walk.

use bitflags::bitflags;

use crate::efivars::{LoadOption, LOAD_OPTION_METADATA_PATH};
use crate::pe::PeImage;
use crate::{Context, Error, ErrorKind};

bitflags! {
    /// Which boot-chain stages to collect
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EspFileFlags: u32 {
        /// The loader the firmware starts directly, e.g. shim
        const INCLUDE_FIRST_STAGE = 1 << 0;
        /// The chained loader, e.g. grub
        const INCLUDE_SECOND_STAGE = 1 << 1;
        /// The `revocations.efi` SBAT payload used by shim
        const INCLUDE_REVOCATIONS = 1 << 2;
    }
}

#[cfg(target_arch = "x86_64")]
const EFI_ARCH_SUFFIX: Option<&str> = Some("x64");
#[cfg(target_arch = "aarch64")]
const EFI_ARCH_SUFFIX: Option<&str> = Some("aa64");
#[cfg(target_arch = "loongarch64")]
const EFI_ARCH_SUFFIX: Option<&str> = Some("loongarch64");
#[cfg(target_arch = "riscv64")]
const EFI_ARCH_SUFFIX: Option<&str> = Some("riscv64");
#[cfg(target_arch = "x86")]
const EFI_ARCH_SUFFIX: Option<&str> = Some("ia32");
#[cfg(target_arch = "arm")]
const EFI_ARCH_SUFFIX: Option<&str> = Some("arm");
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "loongarch64",
    target_arch = "riscv64",
    target_arch = "x86",
    target_arch = "arm"
)))]
const EFI_ARCH_SUFFIX: Option<&str> = None;

/// `shim` becomes `shimx64.efi` on x86-64, and so on
fn uefi_basename(app_name: &str, arch_suffix: Option<&str>) -> Option<String> {
    arch_suffix.map(|suffix| format!("{app_name}{suffix}.efi"))
}

impl Context {
    /// The PE files for all the entries listed in `BootOrder`.
    ///
    /// Entries that cannot be resolved to a registered volume or whose
    /// files are malformed are logged and skipped; policy and I/O failures
    /// abort the walk.
    pub fn esp_files(&self, flags: EspFileFlags) -> Result<Vec<PeImage>, Error> {
        let entries = self.efivars.boot_entries()?;
        let mut files = vec![];
        for entry in &entries {
            if let Err(error) = self.esp_files_for_entry(entry, &mut files, flags, EFI_ARCH_SUFFIX) {
                match error.kind() {
                    ErrorKind::NotFound | ErrorKind::InvalidFile => {
                        log::debug!("ignoring Boot{:04X}: {error}", entry.idx());
                    }
                    _ => return Err(error),
                }
            }
        }
        Ok(files)
    }

    fn esp_files_for_entry(
        &self,
        entry: &LoadOption,
        files: &mut Vec<PeImage>,
        flags: EspFileFlags,
        arch_suffix: Option<&str>,
    ) -> Result<(), Error> {
        // entries without a disk and file record contribute nothing
        let Some(dp_hdd) = entry.device_path().hard_drive() else {
            return Ok(());
        };
        let Some(dp_file) = entry.device_path().file_path() else {
            return Ok(());
        };

        // can we match the volume?
        let volume = self.esp_volume_by_hard_drive_device_path(dp_hdd)?;
        let scope = self.mount_scope(&volume)?;
        let dp_name = dp_file.name()?;
        let filename = scope
            .mount_point()
            .join(dp_name.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned();

        // the file itself
        log::debug!("check for 1st stage bootloader: {filename}");
        if flags.contains(EspFileFlags::INCLUDE_FIRST_STAGE) {
            self.load_pe_tolerant(files, &filename, entry.idx())?;
        }

        let Some(shim_name) = uefi_basename("shim", arch_suffix) else {
            return Ok(());
        };

        // the 2nd stage bootloader, typically grub
        if flags.contains(EspFileFlags::INCLUDE_SECOND_STAGE) && filename.ends_with(&shim_name) {
            let replacement = entry
                .metadata(LOAD_OPTION_METADATA_PATH)
                .unwrap_or_else(|| uefi_basename("grub", arch_suffix).expect("suffix checked above"));
            let filename2 = filename.replacen(&shim_name, &replacement, 1);
            log::debug!("check for 2nd stage bootloader: {filename2}");
            self.load_pe_tolerant(files, &filename2, entry.idx())?;
        }

        // revocations, typically for SBAT
        if flags.contains(EspFileFlags::INCLUDE_REVOCATIONS) && filename.ends_with(&shim_name) {
            let filename2 = filename.replacen(&shim_name, "revocations.efi", 1);
            log::debug!("check for revocation: {filename2}");
            self.load_pe_tolerant(files, &filename2, entry.idx())?;
        }

        Ok(())
    }

    /// Collect one PE file, swallowing not-a-PE and broken-PE outcomes
    fn load_pe_tolerant(&self, files: &mut Vec<PeImage>, filename: &str, idx: u16) -> Result<(), Error> {
        match PeImage::load(filename) {
            Ok(mut image) => {
                image.set_idx(idx);
                files.push(image);
                Ok(())
            }
            Err(error) if matches!(error.kind(), ErrorKind::NotSupported | ErrorKind::InvalidFile) => {
                log::debug!("ignoring: {error}");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efipath::{DevicePathList, DevicePathNode, FilePathNode, HardDrivePath};
    use crate::efivars::DummyEfivars;
    use crate::pe::minimal_pe_bytes;
    use crate::testutil::MockInventory;
    use crate::ContextFlags;
    use fs_err as fs;
    use std::rc::Rc;
    use tempfile::TempDir;
    use uuid::Uuid;
    use volumes::{PartitionKind, Volume};

    const X64: Option<&str> = Some("x64");

    struct Fixture {
        context: Context,
        volume: Rc<Volume>,
        #[allow(dead_code)]
        tree: TempDir,
    }

    /// One registered, premounted ESP with an `EFI/ubuntu` tree
    fn fixture(efivars: DummyEfivars) -> Fixture {
        let tree = TempDir::new().unwrap();
        fs::create_dir_all(tree.path().join("EFI").join("ubuntu")).unwrap();
        let volume = Rc::new(
            Volume::new("/dev/sda1", PartitionKind::Esp)
                .with_filesystem_type("vfat")
                .with_partition_uuid(Uuid::parse_str("deadbeef-dead-beef-dead-beefdeadbeef").unwrap())
                .with_partition_number(1)
                .with_partition_start(2048 * 512)
                .with_size(1_048_576 * 512)
                .with_mount_point(tree.path()),
        );
        let context = Context::new(Box::new(MockInventory::default()), Box::new(efivars));
        context.add_esp_volume(volume.clone());
        Fixture { context, volume, tree }
    }

    fn entry_for(volume: &Volume, idx: u16, file: &str) -> LoadOption {
        LoadOption::new(idx, "test entry").with_device_path(DevicePathList::new(vec![
            DevicePathNode::HardDrive(HardDrivePath::from_volume(volume).unwrap()),
            DevicePathNode::FilePath(FilePathNode::new(file)),
        ]))
    }

    fn write_efi(fixture: &Fixture, name: &str, data: &[u8]) {
        fs::write(fixture.tree.path().join("EFI").join("ubuntu").join(name), data).unwrap();
    }

    #[test]
    fn corrupted_second_stage_is_swallowed() {
        let fixture = fixture(DummyEfivars::new());
        write_efi(&fixture, "shimx64.efi", &minimal_pe_bytes());
        write_efi(&fixture, "grubx64.efi", b"not a pe file at all, but long enough to check the magic properly");

        let entry = entry_for(&fixture.volume, 1, "\\EFI\\ubuntu\\shimx64.efi");
        let mut files = vec![];
        fixture
            .context
            .esp_files_for_entry(
                &entry,
                &mut files,
                EspFileFlags::INCLUDE_FIRST_STAGE | EspFileFlags::INCLUDE_SECOND_STAGE,
                X64,
            )
            .unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].filename().to_string_lossy().ends_with("shimx64.efi"));
        assert_eq!(files[0].idx(), 1);
    }

    #[test]
    fn full_chain_with_revocations() {
        let fixture = fixture(DummyEfivars::new());
        write_efi(&fixture, "shimx64.efi", &minimal_pe_bytes());
        write_efi(&fixture, "grubx64.efi", &minimal_pe_bytes());
        write_efi(&fixture, "revocations.efi", &minimal_pe_bytes());

        let entry = entry_for(&fixture.volume, 3, "\\EFI\\ubuntu\\shimx64.efi");
        let mut files = vec![];
        fixture
            .context
            .esp_files_for_entry(&entry, &mut files, EspFileFlags::all(), X64)
            .unwrap();

        let names = files
            .iter()
            .map(|f| f.filename().file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["shimx64.efi", "grubx64.efi", "revocations.efi"]);
        assert!(files.iter().all(|f| f.idx() == 3));
    }

    #[test]
    fn metadata_path_overrides_second_stage() {
        let fixture = fixture(DummyEfivars::new());
        write_efi(&fixture, "shimx64.efi", &minimal_pe_bytes());
        write_efi(&fixture, "custom-loader.efi", &minimal_pe_bytes());

        let entry = entry_for(&fixture.volume, 0, "\\EFI\\ubuntu\\shimx64.efi")
            .with_optional_data(b"custom-loader.efi".to_vec());
        let mut files = vec![];
        fixture
            .context
            .esp_files_for_entry(&entry, &mut files, EspFileFlags::INCLUDE_SECOND_STAGE, X64)
            .unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].filename().to_string_lossy().ends_with("custom-loader.efi"));
    }

    #[test]
    fn non_shim_first_stage_has_no_second_stage() {
        let fixture = fixture(DummyEfivars::new());
        fs::create_dir_all(fixture.tree.path().join("EFI").join("BOOT")).unwrap();
        fs::write(
            fixture.tree.path().join("EFI").join("BOOT").join("BOOTX64.EFI"),
            minimal_pe_bytes(),
        )
        .unwrap();

        let entry = entry_for(&fixture.volume, 0, "\\EFI\\BOOT\\BOOTX64.EFI");
        let mut files = vec![];
        fixture
            .context
            .esp_files_for_entry(&entry, &mut files, EspFileFlags::all(), X64)
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn unmapped_architecture_only_yields_first_stage() {
        let fixture = fixture(DummyEfivars::new());
        write_efi(&fixture, "shimx64.efi", &minimal_pe_bytes());
        write_efi(&fixture, "grubx64.efi", &minimal_pe_bytes());

        let entry = entry_for(&fixture.volume, 0, "\\EFI\\ubuntu\\shimx64.efi");
        let mut files = vec![];
        fixture
            .context
            .esp_files_for_entry(&entry, &mut files, EspFileFlags::all(), None)
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn entries_without_disk_or_file_records_are_skipped() {
        let fixture = fixture(DummyEfivars::new());
        let mut files = vec![];

        // no device path at all
        let bare = LoadOption::new(0, "bare");
        fixture
            .context
            .esp_files_for_entry(&bare, &mut files, EspFileFlags::all(), X64)
            .unwrap();

        // file record without a disk record
        let fileless = LoadOption::new(1, "fileless").with_device_path(DevicePathList::new(vec![
            DevicePathNode::FilePath(FilePathNode::new("\\EFI\\ubuntu\\shimx64.efi")),
        ]));
        fixture
            .context
            .esp_files_for_entry(&fileless, &mut files, EspFileFlags::all(), X64)
            .unwrap();

        assert!(files.is_empty());
    }

    #[test]
    fn walk_groups_files_by_entry_in_boot_order() {
        let mut efivars = DummyEfivars::new();
        let staged = fixture(DummyEfivars::new());
        write_efi(&staged, "shimx64.efi", &minimal_pe_bytes());
        write_efi(&staged, "grubx64.efi", &minimal_pe_bytes());
        fs::create_dir_all(staged.tree.path().join("EFI").join("BOOT")).unwrap();
        fs::write(
            staged.tree.path().join("EFI").join("BOOT").join("BOOTX64.EFI"),
            minimal_pe_bytes(),
        )
        .unwrap();

        efivars.add_boot_entry(entry_for(&staged.volume, 2, "\\EFI\\ubuntu\\shimx64.efi"));
        efivars.add_boot_entry(entry_for(&staged.volume, 7, "\\EFI\\BOOT\\BOOTX64.EFI"));

        // same tree and volume, fresh context owning the populated efivars
        let context = Context::new(Box::new(MockInventory::default()), Box::new(efivars));
        context.add_esp_volume(staged.volume.clone());

        let mut files = vec![];
        for entry in context.efivars.boot_entries().unwrap() {
            context
                .esp_files_for_entry(&entry, &mut files, EspFileFlags::all(), X64)
                .unwrap();
        }
        assert_eq!(files.iter().map(PeImage::idx).collect::<Vec<_>>(), vec![2, 2, 7]);
    }

    #[test]
    fn unresolvable_entry_skips_but_walk_continues() {
        let mut efivars = DummyEfivars::new();
        let orphan_dp = HardDrivePath {
            partition_number: 5,
            partition_start: 99,
            partition_size: 100,
            signature: [9u8; 16],
            partition_format: HardDrivePath::FORMAT_GPT,
            signature_type: HardDrivePath::SIGNATURE_TYPE_GUID,
        };
        efivars.add_boot_entry(LoadOption::new(0, "orphan").with_device_path(DevicePathList::new(vec![
            DevicePathNode::HardDrive(orphan_dp),
            DevicePathNode::FilePath(FilePathNode::new("\\EFI\\other\\loader.efi")),
        ])));

        let fixture = fixture(efivars);
        write_efi(&fixture, "shimx64.efi", &minimal_pe_bytes());

        // the orphan entry resolves to no registered volume and is skipped
        let files = fixture.context.esp_files(EspFileFlags::INCLUDE_FIRST_STAGE).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn empty_boot_order_is_empty_success() {
        let fixture = fixture(DummyEfivars::new());
        assert!(fixture.context.esp_files(EspFileFlags::all()).unwrap().is_empty());
    }

    #[test]
    fn mount_policy_aborts_the_walk() {
        let mut efivars = DummyEfivars::new();
        let staged = fixture(DummyEfivars::new());
        write_efi(&staged, "shimx64.efi", &minimal_pe_bytes());
        efivars.add_boot_entry(entry_for(&staged.volume, 0, "\\EFI\\ubuntu\\shimx64.efi"));

        let mut context = Context::new(Box::new(MockInventory::default()), Box::new(efivars));
        context.add_esp_volume(staged.volume.clone());
        context.add_flag(ContextFlags::INHIBIT_VOLUME_MOUNT);

        let error = context.esp_files(EspFileFlags::INCLUDE_FIRST_STAGE).unwrap_err();
        assert_eq!(error.to_string(), "cannot mount volume by policy");
    }
}
