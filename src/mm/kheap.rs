//! Heap fixa do kernel
//!
//! Uma região carved do allocator físico no boot, servida por
//! `linked_list_allocator`. É o `GlobalAlloc` do crate e o fallback das
//! caches slab para objetos grandes.

use crate::arch::traits::cpu::CpuOps;
use crate::arch::Cpu;
use crate::mm::physmap::phys_to_virt;
use crate::mm::pmm::{self, AllocFlags};
use crate::mm::PAGE_SIZE;
use crate::sync::Spinlock;
use bitflags::bitflags;
#[cfg(not(test))]
use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use core::ptr::{self, NonNull};
use linked_list_allocator::Heap;

/// Tamanho da heap fixa (16 MiB)
const HEAP_PAGES: usize = 4096;
/// Alinhamento mínimo devolvido por kmalloc
const MIN_ALIGN: usize = 16;

bitflags! {
    /// Flags de alocação da heap
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeapFlags: u32 {
        /// Pode tentar reclaim antes de falhar
        const CAN_SLEEP = 1 << 0;
        /// Nunca retorna falha; gira até conseguir
        const NO_FAIL = 1 << 1;
        /// Memória zerada
        const ZERO = 1 << 2;
    }
}

static HEAP: Spinlock<Heap> = Spinlock::new("kheap", Heap::empty());

#[cfg(not(test))]
struct KernelAllocator;

#[cfg(not(test))]
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP.lock()
            .allocate_first_fit(layout)
            .map(|p| p.as_ptr())
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            HEAP.lock().deallocate(ptr, layout);
        }
    }
}

// Em testes de host o allocator global é o da std
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[cfg(not(test))]
#[alloc_error_handler]
fn on_alloc_error(_layout: Layout) -> ! {
    crate::core::panic_hard("kheap: alocacao global sem memoria");
}

/// Carve a região da heap e entrega ao allocator. Roda depois do pmm.
pub fn init() {
    let frames = match pmm::alloc(HEAP_PAGES, AllocFlags::empty()) {
        Some(frames) => frames,
        None => crate::core::panic_hard("kheap: sem memoria para a heap fixa"),
    };
    let bottom = phys_to_virt(frames).as_mut_ptr::<u8>();
    // SAFETY: região exclusiva da heap, mapeada pelo physmap
    unsafe {
        HEAP.lock().init(bottom, HEAP_PAGES * PAGE_SIZE);
    }
    crate::kinfo!("kheap: heap fixa em", frames.as_u64(), "paginas=", HEAP_PAGES as u64);
}

fn layout_for(size: usize) -> Layout {
    // Erro só com size absurdo; tratado como OOM pelo chamador
    Layout::from_size_align(size.max(1), MIN_ALIGN)
        .unwrap_or(Layout::new::<u128>())
}

fn try_alloc(size: usize) -> Option<NonNull<u8>> {
    HEAP.lock().allocate_first_fit(layout_for(size)).ok()
}

/// Aloca `size` bytes da heap do kernel.
pub fn kmalloc(size: usize, flags: HeapFlags) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    let mut result = try_alloc(size);
    if result.is_none() && flags.intersects(HeapFlags::CAN_SLEEP | HeapFlags::NO_FAIL) {
        loop {
            // Pressão na heap: devolver magazines do pmm pode não ajudar a
            // heap diretamente, mas solta frames para quem está esperando
            crate::core::sched::yield_now();
            result = try_alloc(size);
            if result.is_some() || !flags.contains(HeapFlags::NO_FAIL) {
                break;
            }
            Cpu::pause();
        }
    }
    let ptr = result?;
    if flags.contains(HeapFlags::ZERO) {
        // SAFETY: bloco recém-alocado de `size` bytes
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
    }
    Some(ptr)
}

/// Libera um bloco de `kmalloc`. `size` deve ser o tamanho pedido.
pub fn kfree(ptr: NonNull<u8>, size: usize) {
    // SAFETY: contrato do chamador: ptr/size vêm de um kmalloc vivo
    unsafe { HEAP.lock().deallocate(ptr, layout_for(size)) };
}

/// Realoca preservando o conteúdo até `min(old_size, new_size)`.
pub fn krealloc(
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
    flags: HeapFlags,
) -> Option<NonNull<u8>> {
    let new_ptr = kmalloc(new_size, flags)?;
    let copy = old_size.min(new_size);
    // SAFETY: ambos os blocos são válidos e não se sobrepõem
    unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy) };
    kfree(ptr, old_size);
    Some(new_ptr)
}

/// `count * size` bytes zerados, com checagem de overflow.
pub fn kcalloc(count: usize, size: usize, flags: HeapFlags) -> Option<NonNull<u8>> {
    let total = count.checked_mul(size)?;
    kmalloc(total, flags | HeapFlags::ZERO)
}
