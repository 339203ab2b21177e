//! Allocator físico buddy
//!
//! Listas livres segregadas por zona e por ordem. Alocações multi-página
//! quebram blocos de ordem maior; liberações coalescem com o buddy. Um
//! magazine por CPU amortece o caminho de ordem 0.
//!
//! Invariante de conservação: free + allocated + reclaimable + reserved =
//! total, em páginas, em qualquer instante fora do lock.

use crate::core::boot::{BootInfo, RangeKind};
use crate::core::smp::MAX_CPUS;
use crate::mm::page::{FrameDb, PageFlags, NO_FRAME};
use crate::mm::physmap::phys_to_virt;
use crate::mm::{PhysAddr, PAGE_SHIFT, PAGE_SIZE};
use crate::sync::Spinlock;
use bitflags::bitflags;

/// Maior ordem de bloco (2^10 páginas = 4 MiB)
pub const MAX_ORDER: usize = 10;
/// Profundidade do magazine per-CPU
const MAGAZINE_DEPTH: usize = 16;

const ZONE_COUNT: usize = 3;

bitflags! {
    /// Flags de alocação física
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Retornar páginas zeradas
        const ZERO = 1 << 0;
        /// Frame abaixo de 16 MiB (DMA ISA)
        const BELOW_16M = 1 << 1;
        /// Frame abaixo de 4 GiB (DMA de 32 bits)
        const BELOW_4G = 1 << 2;
        /// Pode dormir/tentar reclaim em falta de memória
        const CAN_SLEEP = 1 << 3;
    }
}

/// Zonas físicas, da mais restrita para a mais ampla
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
enum Zone {
    Below16M = 0,
    Below4G = 1,
    Any = 2,
}

fn zone_of(addr: PhysAddr) -> Zone {
    if addr.as_u64() < 16 * 1024 * 1024 {
        Zone::Below16M
    } else if addr.as_u64() < 4 * 1024 * 1024 * 1024 {
        Zone::Below4G
    } else {
        Zone::Any
    }
}

/// Zonas aceitáveis para um pedido, da preferida para a de fallback
fn zone_order(flags: AllocFlags) -> &'static [Zone] {
    if flags.contains(AllocFlags::BELOW_16M) {
        &[Zone::Below16M]
    } else if flags.contains(AllocFlags::BELOW_4G) {
        &[Zone::Below4G, Zone::Below16M]
    } else {
        &[Zone::Any, Zone::Below4G, Zone::Below16M]
    }
}

/// Contadores em páginas, por destino
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub total: u64,
    pub free: u64,
    pub allocated: u64,
    pub reclaimable: u64,
    pub reserved: u64,
}

impl Stats {
    /// Invariante de conservação do allocator.
    pub fn conserved(&self) -> bool {
        self.free + self.allocated + self.reclaimable + self.reserved == self.total
    }
}

struct PmmState {
    db: Option<FrameDb>,
    /// Cabeças das listas livres, por zona e por ordem
    free_lists: [[u32; MAX_ORDER + 1]; ZONE_COUNT],
    stats: Stats,
}

impl PmmState {
    const fn new() -> Self {
        Self {
            db: None,
            free_lists: [[NO_FRAME; MAX_ORDER + 1]; ZONE_COUNT],
            stats: Stats {
                total: 0,
                free: 0,
                allocated: 0,
                reclaimable: 0,
                reserved: 0,
            },
        }
    }

    fn push_free(&mut self, index: u32, order: usize) {
        let db = match self.db.as_mut() {
            Some(db) => db,
            None => return,
        };
        let zone = zone_of(db.addr_of(index)) as usize;
        let head = self.free_lists[zone][order];
        {
            let page = db.page_mut(index);
            debug_assert!(!page.flags.contains(PageFlags::FREE), "frame livre duas vezes");
            page.flags.insert(PageFlags::FREE);
            page.flags.remove(PageFlags::RESERVED | PageFlags::RECLAIMABLE);
            page.order = order as u8;
            page.next = head;
            page.prev = NO_FRAME;
        }
        if head != NO_FRAME {
            db.page_mut(head).prev = index;
        }
        self.free_lists[zone][order] = index;
    }

    fn unlink(&mut self, index: u32, zone: usize, order: usize) {
        let db = self.db.as_mut().unwrap_or_else(|| unreachable!());
        let (next, prev) = {
            let page = db.page_mut(index);
            page.flags.remove(PageFlags::FREE);
            (page.next, page.prev)
        };
        if prev != NO_FRAME {
            db.page_mut(prev).next = next;
        } else {
            self.free_lists[zone][order] = next;
        }
        if next != NO_FRAME {
            db.page_mut(next).prev = prev;
        }
    }

    fn pop_free(&mut self, zone: usize, order: usize) -> Option<u32> {
        let head = self.free_lists[zone][order];
        if head == NO_FRAME {
            return None;
        }
        self.unlink(head, zone, order);
        Some(head)
    }

    /// Retira um bloco da ordem pedida, quebrando blocos maiores se preciso.
    fn take_block(&mut self, zone: Zone, order: usize) -> Option<u32> {
        for source in order..=MAX_ORDER {
            if let Some(index) = self.pop_free(zone as usize, source) {
                // Devolver as metades altas até chegar na ordem pedida
                let mut current = source;
                while current > order {
                    current -= 1;
                    self.push_free(index + (1 << current), current);
                }
                return Some(index);
            }
        }
        None
    }

    /// Insere um bloco livre coalescendo com buddies disponíveis.
    fn insert_block(&mut self, mut index: u32, mut order: usize) {
        loop {
            if order >= MAX_ORDER {
                break;
            }
            let buddy = index ^ (1 << order);
            let mergeable = {
                let db = match self.db.as_ref() {
                    Some(db) => db,
                    None => break,
                };
                if !db.contains(buddy) {
                    false
                } else {
                    let page = db.page(buddy);
                    page.flags.contains(PageFlags::FREE)
                        && page.order as usize == order
                        && zone_of(db.addr_of(buddy)) == zone_of(db.addr_of(index))
                }
            };
            if !mergeable {
                break;
            }
            let zone = {
                let db = self.db.as_ref().unwrap_or_else(|| unreachable!());
                zone_of(db.addr_of(buddy)) as usize
            };
            self.unlink(buddy, zone, order);
            index = index.min(buddy);
            order += 1;
        }
        self.push_free(index, order);
    }

    /// Insere um range físico como blocos livres alinhados.
    fn free_range(&mut self, start: PhysAddr, end: PhysAddr) {
        let mut frame = (start.align_up().as_u64() >> PAGE_SHIFT) as u32;
        let last = (end.align_down().as_u64() >> PAGE_SHIFT) as u32;
        while frame < last {
            let mut order = MAX_ORDER;
            // Maior bloco alinhado que cabe e não cruza fronteira de zona
            while order > 0 {
                let span = 1u32 << order;
                let fits = frame % span == 0 && frame + span <= last;
                let same_zone = {
                    let db = self.db.as_ref().unwrap_or_else(|| unreachable!());
                    zone_of(db.addr_of(frame)) == zone_of(db.addr_of(frame + span - 1))
                };
                if fits && same_zone {
                    break;
                }
                order -= 1;
            }
            self.push_free(frame, order);
            self.stats.free += 1u64 << order;
            frame += 1 << order;
        }
    }
}

static PMM: Spinlock<PmmState> = Spinlock::new("pmm", PmmState::new());

struct Magazine {
    slots: [u32; MAGAZINE_DEPTH],
    len: usize,
}

impl Magazine {
    const fn empty() -> Self {
        Self {
            slots: [NO_FRAME; MAGAZINE_DEPTH],
            len: 0,
        }
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const MAGAZINE_INIT: Spinlock<Magazine> = Spinlock::new("pmm_magazine", Magazine::empty());
static MAGAZINES: [Spinlock<Magazine>; MAX_CPUS] = [MAGAZINE_INIT; MAX_CPUS];

fn cpu_magazine() -> &'static Spinlock<Magazine> {
    use crate::arch::traits::cpu::CpuOps;
    let id = crate::arch::Cpu::current_id() as usize;
    &MAGAZINES[id % MAX_CPUS]
}

fn order_for(count: usize) -> usize {
    debug_assert!(count > 0);
    let order = (usize::BITS - (count - 1).leading_zeros()) as usize;
    debug_assert!(order <= MAX_ORDER);
    order
}

fn zero_frames(addr: PhysAddr, count: usize) {
    let virt = phys_to_virt(addr);
    // SAFETY: frames recém-alocados pertencem ao chamador e o physmap cobre
    // toda a memória física
    unsafe {
        core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, count * PAGE_SIZE);
    }
}

/// Constrói o banco de frames e ingere os ranges do handoff.
pub fn init(boot: &BootInfo) {
    let mut max_end: u64 = 0;
    for range in boot.memory {
        max_end = max_end.max(range.base + range.size);
    }
    let nframes = (max_end >> PAGE_SHIFT) as usize;
    let db_bytes = nframes * core::mem::size_of::<crate::mm::page::Page>();
    let db_pages = crate::mm::pages_for(db_bytes) as u64;

    // O banco sai do fim do maior range livre
    let mut carve: Option<(u64, u64)> = None;
    for range in boot.memory {
        if range.kind == RangeKind::Free && range.size >= db_pages * PAGE_SIZE as u64 {
            if carve.map_or(true, |(_, size)| range.size > size) {
                carve = Some((range.base, range.size));
            }
        }
    }
    let (carve_base, carve_size) = match carve {
        Some(found) => found,
        None => crate::core::panic_hard("pmm: sem memoria para o banco de frames"),
    };
    let db_base = PhysAddr::new(carve_base + carve_size - db_pages * PAGE_SIZE as u64)
        .align_down();

    let mut state = PMM.lock();
    // SAFETY: região carved exclusiva, dentro de um range livre do handoff
    state.db = Some(unsafe { FrameDb::new(db_base, nframes) });
    state.stats.total = nframes as u64;
    state.stats.reserved = nframes as u64;

    for range in boot.memory {
        let start = PhysAddr::new(range.base);
        let end = PhysAddr::new(range.base + range.size);
        match range.kind {
            RangeKind::Free => {
                // Excluir a região do banco do range que a cedeu
                let free_end = if range.base == carve_base {
                    db_base
                } else {
                    end
                };
                let pages_before = state.stats.free;
                state.free_range(start, free_end);
                let freed = state.stats.free - pages_before;
                state.stats.reserved -= freed;
            }
            RangeKind::Allocated => {
                let pages = mark_range(&mut state, start, end, PageFlags::empty(), 1);
                state.stats.allocated += pages;
                state.stats.reserved -= pages;
            }
            RangeKind::Reclaimable | RangeKind::Internal => {
                let pages = mark_range(&mut state, start, end, PageFlags::RECLAIMABLE, 0);
                state.stats.reclaimable += pages;
                state.stats.reserved -= pages;
            }
            RangeKind::Reserved => {}
        }
    }

    debug_assert!(state.stats.conserved(), "pmm: conservacao violada no init");
    crate::kinfo!("pmm: frames=", nframes as u64, "livres=", state.stats.free);
}

fn mark_range(
    state: &mut PmmState,
    start: PhysAddr,
    end: PhysAddr,
    flags: PageFlags,
    refcount: u32,
) -> u64 {
    let db = match state.db.as_mut() {
        Some(db) => db,
        None => return 0,
    };
    let first = (start.align_down().as_u64() >> PAGE_SHIFT) as u32;
    let last = (end.align_up().as_u64() >> PAGE_SHIFT) as u32;
    let mut pages = 0;
    for index in first..last {
        if !db.contains(index) {
            break;
        }
        let page = db.page_mut(index);
        page.flags = flags;
        page.refcount = refcount;
        pages += 1;
    }
    pages
}

/// Converte os ranges reclaimable em memória livre. Chamado no fim do boot,
/// depois que nada mais toca o handoff.
pub fn init_reclaim() {
    let mut state = PMM.lock();
    let nframes = match state.db.as_ref() {
        Some(db) => db.nframes() as u32,
        None => return,
    };
    let mut reclaimed: u64 = 0;
    for index in 0..nframes {
        let is_reclaimable = {
            let db = state.db.as_ref().unwrap_or_else(|| unreachable!());
            db.page(index).flags.contains(PageFlags::RECLAIMABLE)
        };
        if is_reclaimable {
            state.insert_block(index, 0);
            reclaimed += 1;
        }
    }
    state.stats.reclaimable -= reclaimed;
    state.stats.free += reclaimed;
    debug_assert!(state.stats.conserved());
    crate::kinfo!("pmm: paginas recuperadas do boot=", reclaimed);
}

fn alloc_from_buddy(count: usize, flags: AllocFlags) -> Option<PhysAddr> {
    let order = order_for(count);
    let mut state = PMM.lock();
    for &zone in zone_order(flags) {
        if let Some(index) = state.take_block(zone, order) {
            let addr = {
                let db = state.db.as_mut().unwrap_or_else(|| unreachable!());
                for offset in 0..(1u32 << order) {
                    let page = db.page_mut(index + offset);
                    page.refcount = 1;
                    page.flags.remove(PageFlags::ZEROED);
                }
                db.page_mut(index).order = order as u8;
                db.addr_of(index)
            };
            let pages = 1u64 << order;
            state.stats.free -= pages;
            state.stats.allocated += pages;
            return Some(addr);
        }
    }
    None
}

/// Devolve os magazines de todas as CPUs para o buddy. Caminho de reclaim
/// usado por pedidos `CAN_SLEEP` em falta de memória.
fn drain_magazines() {
    for magazine in MAGAZINES.iter() {
        let drained: heapless_vec::Drained = {
            let mut mag = magazine.lock();
            let mut drained = heapless_vec::Drained::new();
            while mag.len > 0 {
                mag.len -= 1;
                drained.push(mag.slots[mag.len]);
            }
            drained
        };
        if drained.len > 0 {
            let mut state = PMM.lock();
            for slot in 0..drained.len {
                let index = drained.slots[slot];
                if let Some(db) = state.db.as_mut() {
                    db.page_mut(index).refcount = 0;
                }
                state.insert_block(index, 0);
                state.stats.allocated -= 1;
                state.stats.free += 1;
            }
        }
    }
}

// Buffer fixo para drenar um magazine fora do lock do pmm
mod heapless_vec {
    use super::MAGAZINE_DEPTH;

    pub struct Drained {
        pub slots: [u32; MAGAZINE_DEPTH],
        pub len: usize,
    }

    impl Drained {
        pub fn new() -> Self {
            Self {
                slots: [0; MAGAZINE_DEPTH],
                len: 0,
            }
        }

        pub fn push(&mut self, value: u32) {
            self.slots[self.len] = value;
            self.len += 1;
        }
    }
}

/// Aloca `count` páginas físicas contíguas.
///
/// `None` em falta de memória; com `CAN_SLEEP` o pedido tenta reclaim uma
/// vez antes de desistir.
pub fn alloc(count: usize, flags: AllocFlags) -> Option<PhysAddr> {
    if count == 0 {
        return None;
    }

    // Caminho rápido: ordem 0 sem restrição de zona sai do magazine da CPU
    #[cfg(feature = "percpu_caches")]
    if count == 1 && !flags.intersects(AllocFlags::BELOW_16M | AllocFlags::BELOW_4G) {
        let cached = {
            let mut magazine = cpu_magazine().lock();
            if magazine.len > 0 {
                magazine.len -= 1;
                Some(magazine.slots[magazine.len])
            } else {
                None
            }
        };
        if let Some(index) = cached {
            let addr = PhysAddr::new((index as u64) << PAGE_SHIFT);
            if flags.contains(AllocFlags::ZERO) {
                zero_frames(addr, 1);
            }
            return Some(addr);
        }
    }

    let mut result = alloc_from_buddy(count, flags);
    if result.is_none() && flags.contains(AllocFlags::CAN_SLEEP) {
        drain_magazines();
        result = alloc_from_buddy(count, flags);
    }

    let addr = result?;
    if flags.contains(AllocFlags::ZERO) {
        zero_frames(addr, count);
    }
    Some(addr)
}

/// Libera `count` páginas alocadas por `alloc`.
pub fn free(addr: PhysAddr, count: usize) {
    debug_assert!(addr.is_page_aligned());
    if count == 0 {
        return;
    }
    let order = order_for(count);
    let index = (addr.as_u64() >> PAGE_SHIFT) as u32;

    // Ordem 0 volta para o magazine da CPU, se couber
    #[cfg(feature = "percpu_caches")]
    if order == 0 && zone_of(addr) == Zone::Any {
        let mut magazine = cpu_magazine().lock();
        if magazine.len < MAGAZINE_DEPTH {
            magazine.slots[magazine.len] = index;
            magazine.len += 1;
            return;
        }
    }

    let mut state = PMM.lock();
    let pages = 1u64 << order;
    {
        let db = match state.db.as_mut() {
            Some(db) => db,
            None => return,
        };
        for offset in 0..(1u32 << order) {
            let page = db.page_mut(index + offset);
            debug_assert!(page.refcount > 0, "free de frame ja livre");
            page.refcount = 0;
        }
    }
    state.insert_block(index, order);
    state.stats.allocated -= pages;
    state.stats.free += pages;
}

/// Incrementa a referência de um frame compartilhado (COW, page cache).
pub fn frame_get(addr: PhysAddr) {
    let mut state = PMM.lock();
    if let Some(db) = state.db.as_mut() {
        let index = db.index_of(addr);
        db.page_mut(index).refcount += 1;
    }
}

/// Decrementa a referência; libera o frame quando chega a zero.
pub fn frame_put(addr: PhysAddr) {
    let should_free = {
        let mut state = PMM.lock();
        match state.db.as_mut() {
            Some(db) => {
                let index = db.index_of(addr);
                let page = db.page_mut(index);
                debug_assert!(page.refcount > 0);
                page.refcount -= 1;
                page.refcount == 0
            }
            None => false,
        }
    };
    if should_free {
        // Restaurar o refcount que `free` espera encontrar
        {
            let mut state = PMM.lock();
            if let Some(db) = state.db.as_mut() {
                let index = db.index_of(addr);
                db.page_mut(index).refcount = 1;
            }
        }
        free(addr, 1);
    }
}

/// Fotografia dos contadores.
pub fn stats() -> Stats {
    PMM.lock().stats
}

#[cfg(test)]
mod tests {
    #[test]
    fn reclaim_before_database_is_noop() {
        // Sem database o reclaim retorna sem mexer nos contadores
        super::init_reclaim();
        assert_eq!(super::stats().free, 0);
    }
}
