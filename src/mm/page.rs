//! Banco de frames físicos
//!
//! Um registro por página física. As listas livres do buddy são intrusivas:
//! `next`/`prev` encadeiam índices de frame dentro do próprio banco. Todo
//! acesso é serializado pelo lock do pmm, que é o dono do banco.

use crate::mm::physmap::phys_to_virt;
use crate::mm::{PhysAddr, PAGE_SHIFT};
use bitflags::bitflags;

/// Índice nulo nas listas intrusivas
pub const NO_FRAME: u32 = u32::MAX;

bitflags! {
    /// Estado de um frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// Conteúdo garantidamente zerado
        const ZEROED = 1 << 0;
        /// Fora do alcance do allocator
        const RESERVED = 1 << 1;
        /// Liberável após o boot (`init_reclaim`)
        const RECLAIMABLE = 1 << 2;
        /// Atualmente numa lista livre do buddy
        const FREE = 1 << 3;
    }
}

/// Registro de um frame físico
pub struct Page {
    /// Referências ativas; frame livre tem 0, usado tem ≥ 1
    pub refcount: u32,
    pub flags: PageFlags,
    /// Ordem do bloco buddy do qual este frame é cabeça (válido se FREE)
    pub order: u8,
    /// Id do dono (processo ou cache), 0 = kernel
    pub owner: u32,
    pub next: u32,
    pub prev: u32,
}

impl Page {
    const fn reserved() -> Self {
        Self {
            refcount: 0,
            flags: PageFlags::RESERVED,
            order: 0,
            owner: 0,
            next: NO_FRAME,
            prev: NO_FRAME,
        }
    }
}

/// Banco de frames, carved da memória física no init do pmm
pub struct FrameDb {
    pages: &'static mut [Page],
}

impl FrameDb {
    /// Constrói o banco sobre uma região física já reservada.
    ///
    /// # Safety
    /// `base` deve apontar para ao menos `nframes * size_of::<Page>()` bytes
    /// exclusivos do banco, acessíveis via physmap.
    pub unsafe fn new(base: PhysAddr, nframes: usize) -> Self {
        let ptr = phys_to_virt(base).as_mut_ptr::<Page>();
        for index in 0..nframes {
            ptr.add(index).write(Page::reserved());
        }
        Self {
            pages: core::slice::from_raw_parts_mut(ptr, nframes),
        }
    }

    pub fn nframes(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn index_of(&self, addr: PhysAddr) -> u32 {
        (addr.as_u64() >> PAGE_SHIFT) as u32
    }

    #[inline]
    pub fn addr_of(&self, index: u32) -> PhysAddr {
        PhysAddr::new((index as u64) << PAGE_SHIFT)
    }

    #[inline]
    pub fn page(&self, index: u32) -> &Page {
        &self.pages[index as usize]
    }

    #[inline]
    pub fn page_mut(&mut self, index: u32) -> &mut Page {
        &mut self.pages[index as usize]
    }

    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.pages.len()
    }
}
