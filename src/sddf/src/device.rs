/* SPDX-License-Identifier: GPL-2.0-only */

//! Device materialisation: the shared first step of every `connect`
//!
//! Resolves the device node against the catalogue, then turns the
//! descriptor's abstract regions and interrupts into concrete memory
//! regions (translated physical addresses, page-rounded sizes, uncached
//! driver mappings) and kernel IRQ registrations.

use log::debug;

use data::device::{DeviceIrqResource, DeviceResources};
use data::DeviceRegion;
use devicetree::Node;
use sdf::{IrqTrigger, MemoryRegion, PdId, Perms, SystemDescription};

use crate::{DeviceClass, DriverRepo, Error};

pub(crate) fn attach_driver(
    sdf: &mut SystemDescription,
    repo: &DriverRepo,
    class: DeviceClass,
    driver: PdId,
    node: Node<'_>,
) -> Result<DeviceResources, Error> {
    if !node.is_enabled() {
        return Err(Error::DeviceStatusInvalid {
            node: node.name().to_string(),
        });
    }
    let compatibles = node.compatible();
    let descriptor = repo
        .find_driver(&compatibles, class)
        .ok_or_else(|| Error::UnknownDevice {
            node: node.name().to_string(),
            compatibles: compatibles.iter().map(|s| s.to_string()).collect(),
        })?;
    debug!(
        "driver '{}' handles node '{}' for pd '{}'",
        descriptor.name,
        node.name(),
        sdf.pd(driver).name()
    );

    let arch = sdf.arch();
    let invalid = |reason: String| Error::InvalidConfig {
        node: node.name().to_string(),
        reason,
    };
    let reg = node.reg()?;
    let mut resources = DeviceResources::default();
    for region in &descriptor.regions {
        let entry = reg
            .get(region.dt_index)
            .ok_or_else(|| invalid(format!("no reg entry at index {}", region.dt_index)))?;
        let dtb_size = entry.size as u64;
        let size = match region.size {
            Some(size) if size > dtb_size => {
                return Err(invalid(format!(
                    "region '{}' wants {size:#x} bytes but the node offers {dtb_size:#x}",
                    region.name
                )));
            }
            Some(size) if !arch.is_page_aligned(size) => {
                return Err(invalid(format!(
                    "region '{}' size {size:#x} is not page aligned",
                    region.name
                )));
            }
            Some(size) => size,
            None => arch.round_up_to_page(dtb_size),
        };
        let perms = Perms::parse(&region.perms)
            .ok_or_else(|| invalid(format!("bad permission string '{}'", region.perms)))?;
        let paddr = node.reg_paddr(arch, entry.addr)?;
        let mr_name = format!("{}_{}", sdf.pd(driver).name(), region.name);
        let mr = MemoryRegion::physical(sdf, mr_name, size, Some(paddr));
        // device registers are never cached
        let vaddr = sdf.map(driver, &mr, perms, false, region.setvar.as_deref());
        sdf.add_mr(mr);
        resources.regions.push(DeviceRegion::new(vaddr, size, paddr));
    }

    let irqs = node.interrupts(arch)?;
    for irq in &descriptor.irqs {
        let spec = irqs
            .get(irq.dt_index)
            .ok_or_else(|| invalid(format!("no interrupt at index {}", irq.dt_index)))?;
        // RISC-V cells carry no trigger; level is the platform default
        let trigger = spec.trigger.unwrap_or(IrqTrigger::Level);
        let id = sdf.pd_mut(driver).add_irq(spec.irq, trigger, irq.id)?;
        resources.irqs.push(DeviceIrqResource { id, irq: spec.irq });
    }
    Ok(resources)
}
