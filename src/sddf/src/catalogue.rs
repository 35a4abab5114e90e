/* SPDX-License-Identifier: GPL-2.0-only */

//! Driver catalogue probe
//!
//! The sDDF repository keeps one JSON descriptor per driver under
//! `drivers/<class>/<driver>/config.json`. Partial repositories are
//! expected: a directory without a descriptor is skipped silently (a
//! `debug!` line only). The probed catalogue is a value threaded through
//! composition so independent composes never share state.

use std::fs;
use std::path::Path;

use log::{debug, trace};
use serde::Deserialize;

use devicetree::is_compatible;

use crate::Error;

/// The standard device classes, in catalogue enumeration order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Serial,
    Network,
    Timer,
    Blk,
    I2c,
    Gpu,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 6] = [
        DeviceClass::Serial,
        DeviceClass::Network,
        DeviceClass::Timer,
        DeviceClass::Blk,
        DeviceClass::I2c,
        DeviceClass::Gpu,
    ];

    /// Directory name inside the repository's `drivers/` tree
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Network => "network",
            Self::Timer => "timer",
            Self::Blk => "blk",
            Self::I2c => "i2c",
            Self::Gpu => "gpu",
        }
    }
}

/// An abstract device region a driver wants mapped
///
/// `dt_index` picks the entry of the node's `reg` the region comes from.
/// An explicit `size` must be page aligned and no larger than the
/// device-tree entry.
#[derive(Clone, Debug, Deserialize)]
pub struct DriverRegion {
    pub name: String,
    #[serde(default = "default_perms")]
    pub perms: String,
    #[serde(default)]
    pub setvar: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    pub dt_index: usize,
}

fn default_perms() -> String {
    "rw".to_string()
}

/// A driver interrupt; `dt_index` picks the entry of the node's
/// `interrupts`
#[derive(Clone, Debug, Deserialize)]
pub struct DriverIrq {
    pub dt_index: usize,
    #[serde(default)]
    pub id: Option<u8>,
}

/// One `config.json` driver descriptor
#[derive(Clone, Debug, Deserialize)]
pub struct DriverDescriptor {
    pub name: String,
    #[serde(default)]
    pub compatible: Vec<String>,
    #[serde(default)]
    pub regions: Vec<DriverRegion>,
    #[serde(default)]
    pub irqs: Vec<DriverIrq>,
}

/// The probed driver catalogue
#[derive(Debug, Default)]
pub struct DriverRepo {
    descriptors: Vec<(DeviceClass, DriverDescriptor)>,
}

impl DriverRepo {
    /// Scan an sDDF repository
    ///
    /// Iterates classes in enumeration order, then the class directory in
    /// filesystem order (unspecified; don't rely on it between drivers of
    /// one class).
    pub fn probe(repo: &Path) -> Result<Self, Error> {
        let mut catalogue = Self::default();
        for class in DeviceClass::ALL {
            let dir = repo.join("drivers").join(class.dir_name());
            let Ok(entries) = fs::read_dir(&dir) else {
                debug!("no {} driver directory under {}", class.dir_name(), repo.display());
                continue;
            };
            for entry in entries.flatten() {
                let config = entry.path().join("config.json");
                let Ok(text) = fs::read_to_string(&config) else {
                    debug!("skipping {} (no config.json)", entry.path().display());
                    continue;
                };
                let descriptor: DriverDescriptor =
                    serde_json::from_str(&text).map_err(|e| Error::Catalogue {
                        path: config.display().to_string(),
                        reason: e.to_string(),
                    })?;
                trace!(
                    "catalogue: {} driver '{}' (compatible {:?})",
                    class.dir_name(),
                    descriptor.name,
                    descriptor.compatible
                );
                catalogue.add(class, descriptor);
            }
        }
        Ok(catalogue)
    }

    /// Register a descriptor directly, preserving probe order
    pub fn add(&mut self, class: DeviceClass, descriptor: DriverDescriptor) {
        self.descriptors.push((class, descriptor));
    }

    /// First descriptor of `class` matching any of the device's
    /// compatibles
    pub fn find_driver(
        &self,
        compatibles: &[&str],
        class: DeviceClass,
    ) -> Option<&DriverDescriptor> {
        self.descriptors
            .iter()
            .filter(|(c, _)| *c == class)
            .map(|(_, d)| d)
            .find(|d| {
                let wanted: Vec<&str> = d.compatible.iter().map(String::as_str).collect();
                is_compatible(compatibles, &wanted)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn descriptor(name: &str, compatible: &[&str]) -> DriverDescriptor {
        DriverDescriptor {
            name: name.to_string(),
            compatible: compatible.iter().map(|s| s.to_string()).collect(),
            regions: Vec::new(),
            irqs: Vec::new(),
        }
    }

    #[test]
    fn first_match_wins() {
        let mut repo = DriverRepo::default();
        repo.add(DeviceClass::Serial, descriptor("uart_a", &["ns16550a"]));
        repo.add(DeviceClass::Serial, descriptor("uart_b", &["ns16550a", "arm,pl011"]));
        repo.add(DeviceClass::Blk, descriptor("virtio_blk", &["virtio,mmio"]));

        let found = repo.find_driver(&["ns16550a"], DeviceClass::Serial).unwrap();
        assert_eq!(found.name, "uart_a");
        // class filters apply even when compatibles match
        assert!(repo.find_driver(&["ns16550a"], DeviceClass::Blk).is_none());
        assert!(repo.find_driver(&["virtio,mmio"], DeviceClass::Blk).is_some());
    }

    #[test]
    fn probe_skips_partial_repositories() {
        let root = tempfile::tempdir().unwrap();
        let drivers = root.path().join("drivers");
        fs::create_dir_all(drivers.join("serial/ns16550a")).unwrap();
        fs::create_dir_all(drivers.join("serial/undescribed")).unwrap();
        fs::create_dir_all(drivers.join("i2c")).unwrap();
        fs::write(
            drivers.join("serial/ns16550a/config.json"),
            r#"{
                "name": "ns16550a",
                "compatible": ["ns16550a", "snps,dw-apb-uart"],
                "regions": [{ "name": "regs", "perms": "rw", "dt_index": 0 }],
                "irqs": [{ "dt_index": 0 }]
            }"#,
        )
        .unwrap();

        let repo = DriverRepo::probe(root.path()).unwrap();
        let found = repo
            .find_driver(&["snps,dw-apb-uart"], DeviceClass::Serial)
            .unwrap();
        assert_eq!(found.name, "ns16550a");
        assert_eq!(found.regions.len(), 1);
        assert_eq!(found.regions[0].perms, "rw");
        assert!(repo.find_driver(&["ns16550a"], DeviceClass::I2c).is_none());
    }

    #[test]
    fn probe_surfaces_malformed_descriptors() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("drivers/timer/broken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), "{ not json").unwrap();
        assert!(matches!(
            DriverRepo::probe(root.path()),
            Err(Error::Catalogue { .. })
        ));
    }
}
