//! Gerência de memória
//!
//! Camadas, de baixo para cima: banco de frames (`page`), allocator físico
//! buddy (`pmm`), contextos de MMU (`mmu`), heap fixa (`kheap`) e caches
//! slab (`slab`). `safe` faz a travessia kernel↔usuário e `fault` trata
//! page faults.

pub mod fault;
pub mod kheap;
pub mod mmu;
pub mod page;
pub mod physmap;
pub mod pmm;
pub mod safe;
pub mod slab;

use crate::core::boot::BootInfo;

/// Tamanho de página base
pub const PAGE_SIZE: usize = 4096;
/// log2 do tamanho de página
pub const PAGE_SHIFT: u32 = 12;

/// Endereço físico
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    pub const fn align_up(self) -> Self {
        Self((self.0 + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1))
    }
}

/// Endereço virtual
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }
}

/// Páginas necessárias para `bytes`
pub const fn pages_for(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Inicializa toda a pilha de memória, na ordem de dependência.
pub fn init(boot: &BootInfo) {
    physmap::init(boot.phys_offset);
    pmm::init(boot);
    kheap::init();
    mmu::init();
    slab::init();
    crate::kinfo!("mm: pilha de memoria pronta, paginas livres=", pmm::stats().free);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(PhysAddr::new(0x1234).align_down().as_u64(), 0x1000);
        assert_eq!(PhysAddr::new(0x1234).align_up().as_u64(), 0x2000);
        assert_eq!(PhysAddr::new(0x2000).align_up().as_u64(), 0x2000);
        assert!(PhysAddr::new(0x3000).is_page_aligned());
    }

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }
}
