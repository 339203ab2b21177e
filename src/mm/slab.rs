//! Caches slab
//!
//! Objetos de tamanho fixo carved de páginas inteiras, com um par de
//! magazines por CPU e um depósito de magazines cheios/vazios. O construtor
//! roda quando o slab é carved; objetos que circulam pelos magazines voltam
//! sem reconstrução. O destrutor só roda quando o slab é devolvido ao
//! allocator físico.
//!
//! Objetos maiores que 1/8 de página não passam por slab: vão direto para a
//! heap do kernel.

use crate::core::smp::MAX_CPUS;
use crate::mm::kheap::{self, HeapFlags};
use crate::mm::physmap::phys_to_virt;
use crate::mm::pmm::{self, AllocFlags};
use crate::mm::{PhysAddr, PAGE_SIZE};
use crate::sync::Spinlock;
use alloc::vec::Vec;
use core::ptr::NonNull;

/// Acima disso o objeto vai direto para a kheap
const LARGE_THRESHOLD: usize = PAGE_SIZE / 8;
/// Objetos por magazine
const MAGAZINE_DEPTH: usize = 16;

type ObjHook = fn(*mut u8);

#[derive(Clone, Copy)]
struct Magazine {
    // Endereços como usize para manter Send
    slots: [usize; MAGAZINE_DEPTH],
    len: usize,
}

impl Magazine {
    const fn empty() -> Self {
        Self {
            slots: [0; MAGAZINE_DEPTH],
            len: 0,
        }
    }

    fn push(&mut self, obj: usize) -> bool {
        if self.len == MAGAZINE_DEPTH {
            return false;
        }
        self.slots[self.len] = obj;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.slots[self.len])
    }
}

/// Uma página carved em objetos
struct SlabPage {
    /// Endereço virtual da página (physmap)
    base: usize,
    /// Offsets livres dentro da página
    free: Vec<u32>,
    /// Objetos fora do slab (em uso ou em magazines)
    inuse: usize,
}

struct CacheInner {
    slabs: Vec<SlabPage>,
    cpu_mags: [Magazine; MAX_CPUS],
    depot_full: Vec<Magazine>,
    depot_empty: Vec<Magazine>,
}

/// Uma cache de objetos de tamanho fixo
pub struct SlabCache {
    name: &'static str,
    obj_size: usize,
    align: usize,
    ctor: Option<ObjHook>,
    dtor: Option<ObjHook>,
    inner: Spinlock<CacheInner>,
}

impl SlabCache {
    pub const fn new(
        name: &'static str,
        obj_size: usize,
        align: usize,
        ctor: Option<ObjHook>,
        dtor: Option<ObjHook>,
    ) -> Self {
        Self {
            name,
            obj_size,
            align,
            ctor,
            dtor,
            inner: Spinlock::new(name, CacheInner {
                slabs: Vec::new(),
                cpu_mags: [Magazine::empty(); MAX_CPUS],
                depot_full: Vec::new(),
                depot_empty: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn stride(&self) -> usize {
        let align = self.align.max(core::mem::align_of::<usize>());
        (self.obj_size.max(1) + align - 1) & !(align - 1)
    }

    fn is_large(&self) -> bool {
        self.stride() > LARGE_THRESHOLD
    }

    fn cpu_index() -> usize {
        use crate::arch::traits::cpu::CpuOps;
        crate::arch::Cpu::current_id() as usize % MAX_CPUS
    }

    /// Carve uma página nova em objetos, rodando o construtor de cada um.
    fn grow(&self, inner: &mut CacheInner) -> bool {
        let frame = match pmm::alloc(1, AllocFlags::empty()) {
            Some(frame) => frame,
            None => return false,
        };
        let base = phys_to_virt(frame).as_u64() as usize;
        let stride = self.stride();
        let count = PAGE_SIZE / stride;
        let mut free = Vec::with_capacity(count);
        for slot in 0..count {
            let obj = (base + slot * stride) as *mut u8;
            if let Some(ctor) = self.ctor {
                ctor(obj);
            }
            free.push((slot * stride) as u32);
        }
        inner.slabs.push(SlabPage {
            base,
            free,
            inuse: 0,
        });
        true
    }

    fn take_from_slab(&self, inner: &mut CacheInner) -> Option<usize> {
        if !inner.slabs.iter().any(|slab| !slab.free.is_empty()) && !self.grow(inner) {
            return None;
        }
        for slab in inner.slabs.iter_mut() {
            if let Some(offset) = slab.free.pop() {
                slab.inuse += 1;
                return Some(slab.base + offset as usize);
            }
        }
        None
    }

    /// Aloca um objeto. Objetos vindos de magazine preservam o estado
    /// deixado pelo último dono; os demais saem recém-construídos do slab.
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        if self.is_large() {
            let ptr = kheap::kmalloc(self.obj_size, HeapFlags::empty())?;
            if let Some(ctor) = self.ctor {
                ctor(ptr.as_ptr());
            }
            return Some(ptr);
        }

        let obj = {
            let mut inner = self.inner.lock();
            let cpu = Self::cpu_index();
            if let Some(obj) = inner.cpu_mags[cpu].pop() {
                Some(obj)
            } else if let Some(full) = inner.depot_full.pop() {
                let empty = core::mem::replace(&mut inner.cpu_mags[cpu], full);
                inner.depot_empty.push(empty);
                inner.cpu_mags[cpu].pop()
            } else {
                self.take_from_slab(&mut inner)
            }
        }?;
        NonNull::new(obj as *mut u8)
    }

    /// Devolve um objeto. Vai para o magazine da CPU; o destrutor só roda
    /// quando o slab inteiro for recolhido por `reap`.
    pub fn free(&self, ptr: NonNull<u8>) {
        if self.is_large() {
            if let Some(dtor) = self.dtor {
                dtor(ptr.as_ptr());
            }
            kheap::kfree(ptr, self.obj_size);
            return;
        }

        let obj = ptr.as_ptr() as usize;
        let mut inner = self.inner.lock();
        let cpu = Self::cpu_index();
        if inner.cpu_mags[cpu].push(obj) {
            return;
        }
        // Magazine cheio: manda para o depósito e começa um vazio
        let empty = inner.depot_empty.pop().unwrap_or(Magazine::empty());
        let full = core::mem::replace(&mut inner.cpu_mags[cpu], empty);
        inner.depot_full.push(full);
        let pushed = inner.cpu_mags[cpu].push(obj);
        debug_assert!(pushed);
    }

    fn return_to_slab(inner: &mut CacheInner, obj: usize) {
        let page_base = obj & !(PAGE_SIZE - 1);
        for slab in inner.slabs.iter_mut() {
            if slab.base == page_base {
                slab.free.push((obj - page_base) as u32);
                slab.inuse -= 1;
                return;
            }
        }
        debug_assert!(false, "objeto sem slab de origem");
    }

    /// Recolhe memória ociosa: drena o depósito de magazines cheios e
    /// devolve slabs totalmente livres ao allocator físico.
    pub fn reap(&self) -> usize {
        if self.is_large() {
            return 0;
        }
        let mut inner = self.inner.lock();

        while let Some(mut full) = inner.depot_full.pop() {
            while let Some(obj) = full.pop() {
                Self::return_to_slab(&mut inner, obj);
            }
            inner.depot_empty.push(full);
        }

        let mut freed = 0;
        let mut index = 0;
        while index < inner.slabs.len() {
            if inner.slabs[index].inuse == 0 {
                let slab = inner.slabs.swap_remove(index);
                if let Some(dtor) = self.dtor {
                    for &offset in &slab.free {
                        dtor((slab.base + offset as usize) as *mut u8);
                    }
                }
                let virt = crate::mm::VirtAddr::new(slab.base as u64);
                if let Some(phys) = crate::mm::physmap::virt_to_phys(virt) {
                    pmm::free(PhysAddr::new(phys.as_u64()), 1);
                }
                freed += 1;
            } else {
                index += 1;
            }
        }
        freed
    }
}

// SAFETY: todo estado mutável vive atrás do Spinlock interno
unsafe impl Sync for SlabCache {}

/// Ponto de init da camada slab; as caches em si são estáticas nos
/// subsistemas donos.
pub fn init() {
    crate::kdebug!("slab: caches prontas");
}
