// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI device discovery and backend attach over Linux sysfs.
//!
//! Boundary-level glue only: the protocol stack proper begins at
//! [`PcieLfBackend`] and ends at the config-space port. Registration
//! bookkeeping, reference counting, and attach notifications belong
//! to the external front end behind [`BackendRegistry`].

use crate::ConfigSpacePort;
use crate::SocRevision;
use crate::backend::BackendRegistry;
use crate::backend::PcieLfBackend;
use anyhow::Context;
use parking_lot::Mutex;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// A config-space port over the sysfs `config` file of one PCI
/// function. Requires the privileges sysfs demands for config-space
/// writes.
pub struct SysfsConfigPort {
    config: fs_err::File,
}

impl SysfsConfigPort {
    /// Opens the `config` file under `device_dir`.
    pub fn open(device_dir: &Path) -> anyhow::Result<Self> {
        let config = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_dir.join("config"))?;
        Ok(Self { config })
    }
}

impl ConfigSpacePort for SysfsConfigPort {
    fn cfg_read(&self, offset: u32) -> std::io::Result<u32> {
        let mut buf = [0; 4];
        self.config.file().read_exact_at(&mut buf, offset.into())?;
        Ok(u32::from_le_bytes(buf))
    }

    fn cfg_write(&self, offset: u32, value: u32) -> std::io::Result<()> {
        self.config
            .file()
            .write_all_at(&value.to_le_bytes(), offset.into())
    }
}

fn read_sysfs_id(path: PathBuf) -> anyhow::Result<u16> {
    let text = fs_err::read_to_string(path)?;
    let text = text.trim().trim_start_matches("0x");
    u16::from_str_radix(text, 16).context("malformed sysfs id")
}

/// Attaches one device and registers (or re-registers) its backend
/// under the name `pcie-lf-<bdf>`.
pub fn probe_one(
    device_dir: &Path,
    revision: SocRevision,
    registry: &mut dyn BackendRegistry,
) -> anyhow::Result<Arc<Mutex<PcieLfBackend>>> {
    let bdf = device_dir
        .file_name()
        .and_then(|name| name.to_str())
        .context("unnamed sysfs device directory")?;
    let name = format!("pcie-lf-{bdf}");
    tracing::info!(%name, ?revision, "probing rshim pcie device");

    let port = Box::new(SysfsConfigPort::open(device_dir)?);

    if let Some(backend) = registry.find_by_name(&name) {
        // The device came back under a known name; reuse the backend
        // so open front-end handles keep working.
        backend.lock().reattach(port);
        return Ok(backend);
    }

    let mut backend = PcieLfBackend::new(port, revision);
    backend.attach();
    let backend = Arc::new(Mutex::new(backend));
    registry
        .register(&name, backend.clone())
        .with_context(|| format!("failed to register {name}"))?;
    Ok(backend)
}

/// Scans the PCI bus for supported devices and attaches each one.
/// Returns the number of backends attached.
pub fn scan(registry: &mut dyn BackendRegistry) -> anyhow::Result<usize> {
    let mut attached = 0;
    for entry in fs_err::read_dir(SYSFS_PCI_DEVICES)? {
        let dir = entry?.path();
        let Ok(vendor) = read_sysfs_id(dir.join("vendor")) else {
            continue;
        };
        if vendor != rshim_defs::MLNX_VENDOR_ID {
            continue;
        }
        let device = read_sysfs_id(dir.join("device"))?;
        let Some(revision) = SocRevision::from_device_id(device) else {
            continue;
        };
        match probe_one(&dir, revision, registry) {
            Ok(_) => attached += 1,
            Err(error) => {
                tracing::warn!(
                    device_dir = %dir.display(),
                    %error,
                    "failed to attach rshim backend"
                );
            }
        }
    }
    Ok(attached)
}
