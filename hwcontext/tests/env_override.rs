// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Environment-driven test overrides.
//!
//! These mutate the process environment, so they live in their own test
//! binary and run in one serialised test.

use std::rc::Rc;

use uuid::Uuid;

use hwcontext::Context;
use volumes::{BlockDevice, Inventory, PartitionKind, Volume};

struct EmptyInventory;

impl Inventory for EmptyInventory {
    fn volumes_by_kind(&self, _kind: PartitionKind) -> Result<Vec<Rc<Volume>>, volumes::Error> {
        Ok(vec![])
    }

    fn block_devices(&self) -> Result<Vec<BlockDevice>, volumes::Error> {
        Ok(vec![])
    }
}

// S5: the path override installs exactly one synthetic ESP volume
#[test]
fn esp_path_override_installs_synthetic_volume() {
    let esp_dir = tempfile::TempDir::new().unwrap();
    std::env::set_var("FWUPD_UEFI_ESP_PATH", esp_dir.path());
    std::env::set_var("FWUPD_EFIVARS", "dummy");

    // the override is read at construction time
    let context = Context::new(
        Box::new(EmptyInventory),
        Box::new(hwcontext::efivars::DummyEfivars::new()),
    );
    let volumes = context.esp_volumes().unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].partition_kind(), PartitionKind::Esp);
    assert_eq!(volumes[0].partition_uuid(), Uuid::nil());
    assert_eq!(volumes[0].mount_point(), Some(esp_dir.path().to_path_buf()));

    // with a single synthetic candidate the election trusts it
    let elected = context.default_esp().unwrap();
    assert_eq!(elected.mount_point(), Some(esp_dir.path().to_path_buf()));

    // the system constructor honours the dummy efivars switch
    let system = Context::with_system();
    assert!(system.efivars().boot_order().unwrap().is_empty());

    std::env::remove_var("FWUPD_UEFI_ESP_PATH");
    std::env::remove_var("FWUPD_EFIVARS");
}
