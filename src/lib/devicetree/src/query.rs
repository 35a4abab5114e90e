/* SPDX-License-Identifier: GPL-2.0-only */

//! Address translation, interrupt-cell and controller-geometry queries

use log::trace;
use sdf::{Arch, IrqTrigger};

use crate::{Error, Node};

/// ARM interrupt type cell
const ARM_IRQ_TYPE_SPI: u32 = 0;
const ARM_IRQ_TYPE_PPI: u32 = 1;
/// Kernel-visible offsets applied to the controller-local number
const ARM_SPI_OFFSET: u32 = 32;
const ARM_PPI_OFFSET: u32 = 16;
/// Trigger flag cell, masked to its low three bits
const ARM_IRQ_EDGE_RISING: u32 = 0x1;
const ARM_IRQ_LEVEL_HIGH: u32 = 0x4;

const GIC_V2_COMPATIBLES: &[&str] = &["arm,gic-400", "arm,cortex-a15-gic", "arm,gic-v2"];
const GIC_V3_COMPATIBLES: &[&str] = &["arm,gic-v3"];

/// Any-of-any compatible match
pub fn is_compatible(device: &[&str], wanted: &[&str]) -> bool {
    device.iter().any(|d| wanted.contains(d))
}

/// One `reg` entry, kept at full cell width until the final cast
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegEntry {
    pub addr: u128,
    pub size: u128,
}

/// A device interrupt as a kernel identifier plus trigger
///
/// RISC-V interrupt cells carry no trigger; the caller picks a default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceIrq {
    pub irq: u32,
    pub trigger: Option<IrqTrigger>,
}

/// Parse one interrupt specifier
///
/// On ARM the layout is `[type, number, trigger]` with SPI numbers offset
/// by 32 and PPI by 16; the trigger cell is masked to its low three bits
/// (`0x1` edge, `0x4` level). On RISC-V a single cell is the number.
pub fn parse_irq(arch: Arch, cells: &[u32]) -> Result<DeviceIrq, Error> {
    let bad = |node: &str| Error::InvalidInterruptCells {
        node: node.to_string(),
    };
    if arch.is_arm() {
        let [irq_type, number, trigger, ..] = cells else {
            return Err(bad("<anonymous>"));
        };
        let irq = match *irq_type {
            ARM_IRQ_TYPE_SPI => number + ARM_SPI_OFFSET,
            ARM_IRQ_TYPE_PPI => number + ARM_PPI_OFFSET,
            _ => return Err(bad("<anonymous>")),
        };
        let trigger = match trigger & 0x7 {
            ARM_IRQ_EDGE_RISING => IrqTrigger::Edge,
            ARM_IRQ_LEVEL_HIGH => IrqTrigger::Level,
            _ => return Err(bad("<anonymous>")),
        };
        Ok(DeviceIrq {
            irq,
            trigger: Some(trigger),
        })
    } else if arch.is_riscv() {
        let [number] = cells else {
            return Err(bad("<anonymous>"));
        };
        Ok(DeviceIrq {
            irq: *number,
            trigger: None,
        })
    } else {
        Err(Error::UnsupportedArch)
    }
}

/// Number of cells one interrupt specifier occupies on `arch`
fn irq_cells(arch: Arch) -> Result<usize, Error> {
    if arch.is_arm() {
        Ok(3)
    } else if arch.is_riscv() {
        Ok(1)
    } else {
        Err(Error::UnsupportedArch)
    }
}

fn combine(cells: &[u32]) -> u128 {
    cells.iter().fold(0u128, |acc, &c| (acc << 32) | c as u128)
}

impl<'a> Node<'a> {
    /// The node's `reg` entries, shaped by the parent's cell counts
    pub fn reg(&self) -> Result<Vec<RegEntry>, Error> {
        let Some(cells) = self.prop_cells("reg")? else {
            return Ok(Vec::new());
        };
        let (ac, sc) = match self.parent() {
            Some(parent) => (parent.address_cells() as usize, parent.size_cells() as usize),
            None => (2, 1),
        };
        let stride = ac + sc;
        if stride == 0 || cells.len() % stride != 0 {
            return Err(Error::BadCells {
                node: self.name().to_string(),
                prop: "reg".to_string(),
            });
        }
        Ok(cells
            .chunks_exact(stride)
            .map(|entry| RegEntry {
                addr: combine(&entry[..ac]),
                size: combine(&entry[ac..]),
            })
            .collect())
    }

    /// Translate `child_addr` (from this node's `reg`) to a physical
    /// address by walking ancestors' `ranges`, then align down to the
    /// architecture's page
    ///
    /// All mappable addresses are assumed to fit in 64 bits.
    pub fn reg_paddr(&self, arch: Arch, child_addr: u128) -> Result<u64, Error> {
        let mut addr = child_addr;
        let mut node = *self;
        while let Some(parent) = node.parent() {
            addr = parent.translate(addr)?;
            node = parent;
        }
        Ok(arch.round_down_to_page(addr as u64))
    }

    /// Apply this bus node's `ranges` to an address in its child space
    ///
    /// An absent or empty `ranges` is the identity; so is an address no
    /// entry covers.
    fn translate(&self, addr: u128) -> Result<u128, Error> {
        let Some(cells) = self.prop_cells("ranges")? else {
            return Ok(addr);
        };
        if cells.is_empty() {
            return Ok(addr);
        }
        let child_ac = self.address_cells() as usize;
        let parent_ac = match self.parent() {
            Some(p) => p.address_cells() as usize,
            None => 2,
        };
        let sc = self.size_cells() as usize;
        let stride = child_ac + parent_ac + sc;
        if stride == 0 || cells.len() % stride != 0 {
            return Err(Error::BadCells {
                node: self.name().to_string(),
                prop: "ranges".to_string(),
            });
        }
        for entry in cells.chunks_exact(stride) {
            let child_base = combine(&entry[..child_ac]);
            let parent_base = combine(&entry[child_ac..child_ac + parent_ac]);
            let len = combine(&entry[child_ac + parent_ac..]);
            if addr >= child_base && addr - child_base < len {
                let translated = parent_base + (addr - child_base);
                trace!(
                    "ranges of '{}': {addr:#x} -> {translated:#x}",
                    self.name()
                );
                return Ok(translated);
            }
        }
        Ok(addr)
    }

    /// All interrupt specifiers of the node, in `interrupts` order
    pub fn interrupts(&self, arch: Arch) -> Result<Vec<DeviceIrq>, Error> {
        let Some(cells) = self.prop_cells("interrupts")? else {
            return Ok(Vec::new());
        };
        let stride = irq_cells(arch)?;
        if cells.len() % stride != 0 {
            return Err(Error::InvalidInterruptCells {
                node: self.name().to_string(),
            });
        }
        cells
            .chunks_exact(stride)
            .map(|spec| {
                parse_irq(arch, spec).map_err(|e| match e {
                    Error::InvalidInterruptCells { .. } => Error::InvalidInterruptCells {
                        node: self.name().to_string(),
                    },
                    other => other,
                })
            })
            .collect()
    }

    /// Validate a `generic-uio` device: exactly one page-aligned `reg`
    /// entry and at most one interrupt
    pub fn linux_uio(&self, arch: Arch) -> Result<UioDevice, Error> {
        let invalid = |reason: &str| Error::InvalidUio {
            node: self.name().to_string(),
            reason: reason.to_string(),
        };
        let reg = self.reg()?;
        let [entry] = reg.as_slice() else {
            return Err(invalid("expected exactly one reg entry"));
        };
        let paddr = self.reg_paddr(arch, entry.addr)?;
        let size = entry.size as u64;
        if entry.addr as u64 != paddr || !arch.is_page_aligned(size) {
            return Err(invalid("region is not page aligned"));
        }
        let irqs = self.interrupts(arch)?;
        if irqs.len() > 1 {
            return Err(invalid("expected at most one interrupt"));
        }
        Ok(UioDevice {
            paddr,
            size,
            irq: irqs.first().copied(),
        })
    }
}

/// A validated `generic-uio` device region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UioDevice {
    pub paddr: u64,
    pub size: u64,
    pub irq: Option<DeviceIrq>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GicVersion {
    V2,
    V3,
}

/// The GIC's MMIO CPU interface, when it has one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GicCpuIface {
    pub cpu_paddr: u64,
    pub vcpu_paddr: u64,
    pub vcpu_size: u64,
}

/// ARM interrupt-controller geometry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmGic {
    pub version: GicVersion,
    pub mmio: Option<GicCpuIface>,
}

impl crate::DeviceTree {
    /// Locate the ARM GIC and read its version-dependent `reg` geometry
    ///
    /// GICv2 keeps the CPU interface at `reg` index 1 and the virtual CPU
    /// interface at 3; GICv3 at 2 and 4. The CPU-interface fields are
    /// all-present-or-absent.
    pub fn arm_gic(&self, arch: Arch) -> Result<ArmGic, Error> {
        let (node, version) = match self.find_compatible(GIC_V3_COMPATIBLES) {
            Some(node) => (node, GicVersion::V3),
            None => match self.find_compatible(GIC_V2_COMPATIBLES) {
                Some(node) => (node, GicVersion::V2),
                None => return Err(Error::GicNotFound),
            },
        };
        let (cpu_idx, vcpu_idx) = match version {
            GicVersion::V2 => (1, 3),
            GicVersion::V3 => (2, 4),
        };
        let reg = node.reg()?;
        let mmio = match (reg.get(cpu_idx), reg.get(vcpu_idx)) {
            (Some(cpu), Some(vcpu)) => Some(GicCpuIface {
                cpu_paddr: node.reg_paddr(arch, cpu.addr)?,
                vcpu_paddr: node.reg_paddr(arch, vcpu.addr)?,
                vcpu_size: vcpu.size as u64,
            }),
            _ => None,
        };
        Ok(ArmGic { version, mmio })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Builder;

    #[test]
    fn compatible_matching() {
        assert!(is_compatible(&["ns16550a", "snps,dw-apb-uart"], &["ns16550a"]));
        assert!(is_compatible(&["a"], &["b", "a"]));
        assert!(!is_compatible(&["a"], &["b"]));
        assert!(!is_compatible(&[], &["a"]));
    }

    #[test]
    fn reg_with_two_cell_addresses() {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let n = b.add_node(root, "frame@deadbeef00");
        b.add_prop_cells(n, "reg", &[0xde, 0xadbeef00, 0x0, 0x10000]);
        let tree = b.finish();
        let reg = tree.find_node("/frame").unwrap().reg().unwrap();
        assert_eq!(reg, vec![RegEntry { addr: 0xdeadbeef00, size: 0x10000 }]);
    }

    #[test]
    fn ranges_translation_through_two_buses() {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let outer = b.add_node(root, "outer");
        b.add_prop_cells(outer, "#address-cells", &[1]);
        b.add_prop_cells(outer, "#size-cells", &[1]);
        // outer child space 0x0.. maps to 0x2_0000_0000 physically
        b.add_prop_cells(outer, "ranges", &[0x0, 0x2, 0x0, 0x1000_0000]);
        let inner = b.add_node(outer, "inner");
        b.add_prop_cells(inner, "#address-cells", &[1]);
        b.add_prop_cells(inner, "#size-cells", &[1]);
        // inner child space 0x100000.. maps to 0x200000 in outer space
        b.add_prop_cells(inner, "ranges", &[0x10_0000, 0x20_0000, 0x10_0000]);
        let dev = b.add_node(inner, "dev@100800");
        b.add_prop_cells(dev, "reg", &[0x10_0800, 0x100]);
        let tree = b.finish();

        let dev = tree.find_node("/outer/inner/dev").unwrap();
        let reg = dev.reg().unwrap();
        assert_eq!(reg[0].addr, 0x10_0800);
        // 0x100800 -> 0x200800 (inner) -> 0x2_0020_0800 (outer), paged down
        assert_eq!(
            dev.reg_paddr(Arch::Aarch64, reg[0].addr).unwrap(),
            0x2_0020_0000
        );
    }

    #[test]
    fn identity_when_no_ranges() {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[1]);
        let dev = b.add_node(root, "uart@9000000");
        b.add_prop_cells(dev, "reg", &[0x0, 0x900_0123, 0x1000]);
        let tree = b.finish();
        let dev = tree.find_node("/uart").unwrap();
        assert_eq!(
            dev.reg_paddr(Arch::Aarch64, 0x900_0123).unwrap(),
            0x900_0000
        );
    }

    #[test]
    fn arm_interrupt_parsing() {
        // SPI 1, level high
        assert_eq!(
            parse_irq(Arch::Aarch64, &[0, 1, 4]).unwrap(),
            DeviceIrq { irq: 33, trigger: Some(IrqTrigger::Level) }
        );
        // PPI 14, edge rising
        assert_eq!(
            parse_irq(Arch::Aarch64, &[1, 14, 1]).unwrap(),
            DeviceIrq { irq: 30, trigger: Some(IrqTrigger::Edge) }
        );
        // unknown type cell
        assert!(parse_irq(Arch::Aarch64, &[2, 1, 4]).is_err());
        // unknown trigger bits
        assert!(parse_irq(Arch::Aarch64, &[0, 1, 2]).is_err());
    }

    #[test]
    fn riscv_interrupt_parsing() {
        assert_eq!(
            parse_irq(Arch::Riscv64, &[10]).unwrap(),
            DeviceIrq { irq: 10, trigger: None }
        );
        assert!(parse_irq(Arch::Riscv64, &[10, 4]).is_err());
    }

    #[test]
    fn interrupts_property_chunking() {
        let mut b = Builder::new();
        let n = b.add_node(b.root(), "eth");
        b.add_prop_cells(n, "interrupts", &[0, 5, 4, 0, 6, 1]);
        let tree = b.finish();
        let irqs = tree.find_node("/eth").unwrap().interrupts(Arch::Aarch64).unwrap();
        assert_eq!(irqs.len(), 2);
        assert_eq!(irqs[0], DeviceIrq { irq: 37, trigger: Some(IrqTrigger::Level) });
        assert_eq!(irqs[1], DeviceIrq { irq: 38, trigger: Some(IrqTrigger::Edge) });
    }

    fn gic_tree(compatible: &str, reg: &[u32]) -> crate::DeviceTree {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let gic = b.add_node(root, "intc@8000000");
        b.add_prop_str_list(gic, "compatible", &[compatible]);
        b.add_prop_cells(gic, "reg", reg);
        b.finish()
    }

    #[test]
    fn gic_v2_geometry() {
        let tree = gic_tree(
            "arm,gic-400",
            &[
                0x0, 0x800_0000, 0x0, 0x1_0000, // dist
                0x0, 0x801_0000, 0x0, 0x1_0000, // cpu
                0x0, 0x803_0000, 0x0, 0x1_0000, // hyp
                0x0, 0x804_0000, 0x0, 0x2_0000, // vcpu
            ],
        );
        let gic = tree.arm_gic(Arch::Aarch64).unwrap();
        assert_eq!(gic.version, GicVersion::V2);
        assert_eq!(
            gic.mmio,
            Some(GicCpuIface {
                cpu_paddr: 0x801_0000,
                vcpu_paddr: 0x804_0000,
                vcpu_size: 0x2_0000,
            })
        );
    }

    #[test]
    fn gic_v3_without_cpu_interface() {
        let tree = gic_tree(
            "arm,gic-v3",
            &[0x0, 0x800_0000, 0x0, 0x1_0000, 0x0, 0x80a_0000, 0x0, 0xf6_0000],
        );
        let gic = tree.arm_gic(Arch::Aarch64).unwrap();
        assert_eq!(gic.version, GicVersion::V3);
        assert_eq!(gic.mmio, None);
    }

    #[test]
    fn gic_missing() {
        let tree = Builder::new().finish();
        assert_eq!(tree.arm_gic(Arch::Aarch64), Err(Error::GicNotFound));
    }

    #[test]
    fn uio_validation() {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let ok = b.add_node(root, "uio@50000000");
        b.add_prop_cells(ok, "reg", &[0x0, 0x5000_0000, 0x0, 0x1000]);
        b.add_prop_cells(ok, "interrupts", &[0, 40, 4]);
        let bad = b.add_node(root, "uio@60000100");
        b.add_prop_cells(bad, "reg", &[0x0, 0x6000_0100, 0x0, 0x1000]);
        let tree = b.finish();

        let uio = tree.find_node("/uio@50000000").unwrap().linux_uio(Arch::Aarch64).unwrap();
        assert_eq!(uio.paddr, 0x5000_0000);
        assert_eq!(uio.size, 0x1000);
        assert_eq!(uio.irq.unwrap().irq, 72);
        assert!(matches!(
            tree.find_node("/uio@60000100").unwrap().linux_uio(Arch::Aarch64),
            Err(Error::InvalidUio { .. })
        ));
    }
}
