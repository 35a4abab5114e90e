/* SPDX-License-Identifier: GPL-2.0-only */

//! System-description object graph for a capability-based microkernel
//!
//! The description owns every entity of the composed system (memory
//! regions, protection domains, virtual machines, channels) in append-only
//! arenas addressed through copyable handles, allocates the per-PD dense
//! identifier space, and renders the canonical XML consumed by the
//! microkernel's loader tooling.

pub mod arch;
pub mod error;
pub mod mr;
pub mod pd;
mod render;
pub mod vm;

pub use arch::Arch;
pub use error::Error;
pub use mr::{Map, MemoryRegion, Perms};
pub use pd::{Irq, IrqTrigger, PdOptions, ProtectionDomain, SetVar, MAX_IDS};
pub use vm::{Vcpu, VirtualMachine};

use log::trace;

/// Stable handle to a protection domain in a [`SystemDescription`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PdId(pub(crate) usize);

/// Stable handle to a virtual machine in a [`SystemDescription`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VmId(pub(crate) usize);

/// One side of a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelEnd {
    A,
    B,
}

/// A bidirectional notification/PPC link between two PDs
///
/// Ends referring to the same PD are not validated; both ids then come out
/// of the one PD's id space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel {
    pub pd_a: PdId,
    pub pd_b: PdId,
    pub pd_a_id: u8,
    pub pd_b_id: u8,
    pub pd_a_notify: bool,
    pub pd_b_notify: bool,
    /// Which end, if any, is the protected-procedure-call entry
    pub pp: Option<ChannelEnd>,
}

/// Settings for a new channel; ids left `None` take the lowest free slot
#[derive(Clone, Copy, Debug)]
pub struct ChannelOptions {
    pub pd_a: PdId,
    pub pd_b: PdId,
    pub pd_a_id: Option<u8>,
    pub pd_b_id: Option<u8>,
    pub pd_a_notify: bool,
    pub pd_b_notify: bool,
    pub pp: Option<ChannelEnd>,
}

impl ChannelOptions {
    pub fn new(pd_a: PdId, pd_b: PdId) -> Self {
        Self {
            pd_a,
            pd_b,
            pd_a_id: None,
            pd_b_id: None,
            pd_a_notify: true,
            pd_b_notify: true,
            pp: None,
        }
    }
}

/// Root of the system-description object graph
///
/// Every registered entity lives for the life of the description; nothing
/// is ever removed, so handles stay valid from creation to teardown.
pub struct SystemDescription {
    arch: Arch,
    paddr_top: u64,
    mrs: Vec<MemoryRegion>,
    pds: Vec<ProtectionDomain>,
    vms: Vec<VirtualMachine>,
    channels: Vec<Channel>,
}

impl SystemDescription {
    /// A fresh description for `arch`, bump-allocating fixed physical
    /// addresses downwards from `paddr_top`
    pub fn new(arch: Arch, paddr_top: u64) -> Self {
        Self {
            arch,
            paddr_top,
            mrs: Vec::new(),
            pds: Vec::new(),
            vms: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Current watermark; monotonically non-increasing
    pub fn paddr_top(&self) -> u64 {
        self.paddr_top
    }

    /// Take `size` bytes off the top of the physical-address watermark
    pub fn alloc_paddr(&mut self, size: u64) -> u64 {
        self.paddr_top -= size;
        trace!("paddr watermark now {:#x}", self.paddr_top);
        self.paddr_top
    }

    pub fn add_mr(&mut self, mr: MemoryRegion) {
        self.mrs.push(mr);
    }

    pub fn mrs(&self) -> &[MemoryRegion] {
        &self.mrs
    }

    pub fn mr(&self, name: &str) -> Option<&MemoryRegion> {
        self.mrs.iter().find(|mr| mr.name == name)
    }

    /// Register a top-level protection domain
    pub fn add_pd(&mut self, pd: ProtectionDomain) -> PdId {
        self.pds.push(pd);
        PdId(self.pds.len() - 1)
    }

    /// Register `child` under `parent`, claiming a slot in the parent's id
    /// space (the given one, or the lowest free)
    pub fn add_child_pd(
        &mut self,
        parent: PdId,
        child: ProtectionDomain,
        id: Option<u8>,
    ) -> Result<PdId, Error> {
        let child_id = self.pds[parent.0].allocate_id(id)?;
        self.pds.push(child);
        let handle = PdId(self.pds.len() - 1);
        self.pds[handle.0].parent = Some(parent);
        self.pds[parent.0].children.push((child_id, handle));
        Ok(handle)
    }

    /// Attach `vm` as the single virtual machine of `parent`
    pub fn add_vm(&mut self, parent: PdId, vm: VirtualMachine) -> VmId {
        assert!(
            self.pds[parent.0].vm.is_none(),
            "protection domain '{}' already owns a virtual machine",
            self.pds[parent.0].name()
        );
        self.vms.push(vm);
        let handle = VmId(self.vms.len() - 1);
        self.pds[parent.0].vm = Some(handle);
        handle
    }

    pub fn pd(&self, id: PdId) -> &ProtectionDomain {
        &self.pds[id.0]
    }

    pub fn pd_mut(&mut self, id: PdId) -> &mut ProtectionDomain {
        &mut self.pds[id.0]
    }

    pub fn vm(&self, id: VmId) -> &VirtualMachine {
        &self.vms[id.0]
    }

    pub fn vm_mut(&mut self, id: VmId) -> &mut VirtualMachine {
        &mut self.vms[id.0]
    }

    pub fn pds(&self) -> &[ProtectionDomain] {
        &self.pds
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Create a channel, claiming an id slot on each end
    pub fn add_channel(&mut self, options: ChannelOptions) -> Result<Channel, Error> {
        let pd_a_id = self.pds[options.pd_a.0].allocate_id(options.pd_a_id)?;
        let pd_b_id = self.pds[options.pd_b.0].allocate_id(options.pd_b_id)?;
        let channel = Channel {
            pd_a: options.pd_a,
            pd_b: options.pd_b,
            pd_a_id,
            pd_b_id,
            pd_a_notify: options.pd_a_notify,
            pd_b_notify: options.pd_b_notify,
            pp: options.pp,
        };
        self.channels.push(channel);
        Ok(channel)
    }

    /// Map `mr` into `pd` at an auto-picked vaddr, returning the vaddr
    pub fn map(
        &mut self,
        pd: PdId,
        mr: &MemoryRegion,
        perms: Perms,
        cached: bool,
        setvar_vaddr: Option<&str>,
    ) -> u64 {
        let page = mr.page_size.unwrap_or(self.arch.page_size());
        let vaddr = self.pds[pd.0].alloc_vaddr(mr.size, page);
        self.map_at(pd, mr, vaddr, perms, cached, setvar_vaddr);
        vaddr
    }

    /// Map `mr` into `pd` at a fixed vaddr
    pub fn map_at(
        &mut self,
        pd: PdId,
        mr: &MemoryRegion,
        vaddr: u64,
        perms: Perms,
        cached: bool,
        setvar_vaddr: Option<&str>,
    ) {
        let mut map = Map::new(mr, vaddr, perms, cached);
        if let Some(symbol) = setvar_vaddr {
            map = map.with_setvar(symbol);
        }
        self.pds[pd.0].add_map(map);
    }

    /// Map `mr` into the guest address space of `vm` at a fixed address
    pub fn vm_map_at(
        &mut self,
        vm: VmId,
        mr: &MemoryRegion,
        vaddr: u64,
        perms: Perms,
        cached: bool,
    ) {
        let map = Map::new(mr, vaddr, perms, cached);
        self.vms[vm.0].add_map(map);
    }
}
