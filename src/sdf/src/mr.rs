/* SPDX-License-Identifier: GPL-2.0-only */

use bitflags::bitflags;
use core::fmt;

use crate::SystemDescription;

/// A named, sized, optionally physically-fixed frame of memory
///
/// Regions are referenced by name from maps; a map copies the name and size
/// at creation, so regions must never be removed from a description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub name: String,
    pub size: u64,
    pub paddr: Option<u64>,
    pub page_size: Option<u64>,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            paddr: None,
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// A region backed by a specific physical frame
    ///
    /// When `paddr` is absent the address is bump-allocated downwards from
    /// the description's `paddr_top` watermark. An explicit `paddr` does
    /// not move the watermark; keeping explicit ranges below it is the
    /// caller's responsibility. Alignment of the allocated address to the
    /// region's page size is likewise the caller's to arrange (pass sizes
    /// already rounded to the page).
    pub fn physical(
        sdf: &mut SystemDescription,
        name: impl Into<String>,
        size: u64,
        paddr: Option<u64>,
    ) -> Self {
        let paddr = match paddr {
            Some(p) => p,
            None => sdf.alloc_paddr(size),
        };
        Self {
            name: name.into(),
            size,
            paddr: Some(paddr),
            page_size: None,
        }
    }
}

bitflags! {
    /// Access permissions of a mapping
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Perms: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Perms {
    pub const RW: Perms = Perms::READ.union(Perms::WRITE);
    pub const RX: Perms = Perms::READ.union(Perms::EXEC);
    pub const RWX: Perms = Perms::READ.union(Perms::WRITE).union(Perms::EXEC);

    /// Parse a driver-descriptor permission string such as "rw"
    pub fn parse(s: &str) -> Option<Perms> {
        let mut perms = Perms::empty();
        for c in s.chars() {
            match c {
                'r' => perms |= Perms::READ,
                'w' => perms |= Perms::WRITE,
                'x' => perms |= Perms::EXEC,
                _ => return None,
            }
        }
        Some(perms)
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Perms::READ) {
            write!(f, "r")?;
        }
        if self.contains(Perms::WRITE) {
            write!(f, "w")?;
        }
        if self.contains(Perms::EXEC) {
            write!(f, "x")?;
        }
        Ok(())
    }
}

/// A binding of a memory region into a PD or VM address space
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Map {
    pub mr: String,
    pub vaddr: u64,
    pub perms: Perms,
    pub cached: bool,
    pub setvar_vaddr: Option<String>,
    pub(crate) size: u64,
}

impl Map {
    pub fn new(mr: &MemoryRegion, vaddr: u64, perms: Perms, cached: bool) -> Self {
        assert!(
            perms != Perms::WRITE,
            "write-only mapping of '{}' is invalid",
            mr.name
        );
        Self {
            mr: mr.name.clone(),
            vaddr,
            perms,
            cached,
            setvar_vaddr: None,
            size: mr.size,
        }
    }

    /// Name a symbol the loader patches with this mapping's vaddr
    pub fn with_setvar(mut self, symbol: impl Into<String>) -> Self {
        self.setvar_vaddr = Some(symbol.into());
        self
    }
}
