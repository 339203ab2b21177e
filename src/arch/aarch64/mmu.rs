//! Tabelas de página aarch64 (4 níveis, granulo 4K, MAIR, ASIDs).
//!
//! TTBR0 cobre o espaço de usuário (com ASID); TTBR1 cobre o kernel. O MAIR
//! é programado uma vez por CPU com a tabela de índices fixa do kernel.

use crate::arch::traits::mmu::{CacheMode, MapAccess, PageTableOps};
use crate::mm::physmap::phys_to_virt;
use crate::mm::pmm::{self, AllocFlags};
use crate::mm::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::{KResult, Status};
use core::arch::asm;
use core::sync::atomic::{AtomicU16, Ordering};

/// Início do espaço de usuário
pub const USER_BASE: u64 = 0x0000_0000_0010_0000;
/// Tamanho do espaço de usuário (VA de 48 bits via TTBR0)
pub const USER_SIZE: u64 = 0x0000_8000_0000_0000 - USER_BASE;
/// Início do espaço de kernel (TTBR1)
pub const KERNEL_BASE: u64 = 0xFFFF_0000_0000_0000;

// Bits de descriptor
const DESC_VALID: u64 = 1 << 0;
const DESC_TABLE: u64 = 1 << 1; // nível < 3: tabela; nível 3: page
const DESC_AF: u64 = 1 << 10;
const DESC_NG: u64 = 1 << 11; // not-global (entradas de usuário)
const DESC_AP_RO: u64 = 1 << 7;
const DESC_AP_EL0: u64 = 1 << 6;
const DESC_UXN: u64 = 1 << 54;
const DESC_PXN: u64 = 1 << 53;
const DESC_INNER_SHARE: u64 = 3 << 8;
const DESC_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Próximo ASID a alocar (alocação linear; rollover força flush global)
static NEXT_ASID: AtomicU16 = AtomicU16::new(1);

/// Programa o MAIR desta CPU: índice 0 = Normal WB, 1 = Device nGnRE,
/// 2 = Non-cacheable, 3 = Normal NC (write-combine).
pub fn init_mair() {
    let mair: u64 = 0xFF | (0x04 << 8) | (0x44 << 16) | (0x44 << 24);
    // SAFETY: MAIR_EL1 é de escrita livre em EL1
    unsafe { asm!("msr mair_el1, {}", in(reg) mair, options(nomem, nostack)) };
}

fn attr_index(cache: CacheMode) -> u64 {
    (cache as u64) << 2
}

fn cache_from_desc(desc: u64) -> CacheMode {
    match (desc >> 2) & 0x7 {
        0 => CacheMode::Normal,
        1 => CacheMode::Device,
        2 => CacheMode::Uncached,
        _ => CacheMode::WriteCombine,
    }
}

fn access_bits(virt: VirtAddr, access: MapAccess) -> u64 {
    let user = virt.as_u64() < KERNEL_BASE;
    let mut bits = DESC_VALID | DESC_TABLE | DESC_AF | DESC_INNER_SHARE;
    if user {
        bits |= DESC_AP_EL0 | DESC_NG;
    }
    if !access.contains(MapAccess::WRITE) {
        bits |= DESC_AP_RO;
    }
    if !access.contains(MapAccess::EXEC) {
        bits |= DESC_UXN | DESC_PXN;
    } else if user {
        // Código de usuário nunca é executável em EL1
        bits |= DESC_PXN;
    }
    bits
}

fn access_from_desc(desc: u64) -> MapAccess {
    let mut access = MapAccess::READ;
    if desc & DESC_AP_RO == 0 {
        access |= MapAccess::WRITE;
    }
    if desc & DESC_UXN == 0 || desc & DESC_PXN == 0 {
        access |= MapAccess::EXEC;
    }
    access
}

fn table_indices(virt: u64) -> [usize; 4] {
    [
        ((virt >> 39) & 0x1FF) as usize,
        ((virt >> 30) & 0x1FF) as usize,
        ((virt >> 21) & 0x1FF) as usize,
        ((virt >> 12) & 0x1FF) as usize,
    ]
}

/// # Safety
/// `table` deve apontar para uma página de tabela válida.
unsafe fn table_mut(table: PhysAddr) -> &'static mut [u64; 512] {
    &mut *(phys_to_virt(table).as_u64() as *mut [u64; 512])
}

/// Raiz de tabela de páginas aarch64 (TTBR0 + ASID)
pub struct PageTable {
    root: PhysAddr,
    asid: u16,
    kernel: bool,
}

// SAFETY: serializado pelo lock do MmuContext dono
unsafe impl Send for PageTable {}

/// Registra a raiz do kernel. No aarch64 a metade alta vive em TTBR1 fixo e
/// não é herdada por novas raízes; existe pela simetria do HAL.
pub fn set_kernel_root(_root: PhysAddr) {}

impl PageTable {
    /// Adota a raiz TTBR1 ativa no boot como raiz do contexto de kernel.
    ///
    /// # Safety
    /// Só pode existir um dono da raiz ativa; chamada única durante o init.
    pub unsafe fn adopt_active() -> Self {
        let ttbr1: u64;
        asm!("mrs {}, ttbr1_el1", out(reg) ttbr1, options(nomem, nostack));
        Self {
            root: PhysAddr::new(ttbr1 & DESC_ADDR_MASK),
            asid: 0,
            kernel: true,
        }
    }

    fn descend(table: PhysAddr, index: usize, allocate: bool) -> KResult<Option<PhysAddr>> {
        // SAFETY: tabelas instaladas por nós
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & DESC_VALID != 0 {
            return Ok(Some(PhysAddr::new(entry & DESC_ADDR_MASK)));
        }
        if !allocate {
            return Ok(None);
        }
        let new_table = pmm::alloc(1, AllocFlags::ZERO).ok_or(Status::NoMemory)?;
        entries[index] = new_table.as_u64() | DESC_VALID | DESC_TABLE;
        Ok(Some(new_table))
    }

    fn walk(&self, virt: VirtAddr, allocate: bool) -> KResult<Option<(PhysAddr, usize)>> {
        let idx = table_indices(virt.as_u64() & 0x0000_FFFF_FFFF_FFFF);
        let mut table = self.root;
        for level in 0..3 {
            match Self::descend(table, idx[level], allocate)? {
                Some(next) => table = next,
                None => return Ok(None),
            }
        }
        Ok(Some((table, idx[3])))
    }

    /// Libera as tabelas do espaço de usuário (não os frames folha)
    pub fn free_user_tables(&mut self) {
        fn free_level(table: PhysAddr, level: u32) {
            // SAFETY: tabela instalada por nós
            let entries = unsafe { table_mut(table) };
            for entry in entries.iter() {
                if entry & DESC_VALID != 0 && level < 3 {
                    free_level(PhysAddr::new(entry & DESC_ADDR_MASK), level + 1);
                }
            }
            pmm::free(table, 1);
        }
        // SAFETY: raiz válida deste contexto
        let root_entries = unsafe { table_mut(self.root) };
        for entry in root_entries.iter_mut() {
            if *entry & DESC_VALID != 0 {
                free_level(PhysAddr::new(*entry & DESC_ADDR_MASK), 1);
                *entry = 0;
            }
        }
    }
}

impl PageTableOps for PageTable {
    fn new_root(kernel: bool) -> KResult<Self> {
        let root = pmm::alloc(1, AllocFlags::ZERO).ok_or(Status::NoMemory)?;
        let asid = if kernel {
            0
        } else {
            // Rollover de ASID de 16 bits exige flush; raro o bastante
            let asid = NEXT_ASID.fetch_add(1, Ordering::Relaxed);
            if asid == u16::MAX {
                Self::flush_all();
            }
            asid
        };
        Ok(Self { root, asid, kernel })
    }

    fn root_phys(&self) -> PhysAddr {
        self.root
    }

    fn map_raw(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        access: MapAccess,
        cache: CacheMode,
    ) -> KResult<()> {
        debug_assert!(virt.as_u64() % PAGE_SIZE as u64 == 0);
        debug_assert!(phys.as_u64() % PAGE_SIZE as u64 == 0);

        #[cfg(feature = "wx_enforcement")]
        if access.contains(MapAccess::WRITE) && access.contains(MapAccess::EXEC) {
            return Err(Status::PermDenied);
        }

        let (table, index) = self.walk(virt, true)?.ok_or(Status::NoMemory)?;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        if entries[index] & DESC_VALID != 0 {
            return Err(Status::AlreadyExists);
        }
        entries[index] = (phys.as_u64() & DESC_ADDR_MASK)
            | access_bits(virt, access)
            | attr_index(cache);
        Ok(())
    }

    fn protect_raw(&mut self, virt: VirtAddr, access: MapAccess) -> KResult<()> {
        let (table, index) = self.walk(virt, false)?.ok_or(Status::NotFound)?;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & DESC_VALID == 0 {
            return Err(Status::NotFound);
        }
        let keep = entry & (DESC_ADDR_MASK | (0x7 << 2));
        entries[index] = keep | access_bits(virt, access);
        Self::invalidate(virt);
        Ok(())
    }

    fn unmap_raw(&mut self, virt: VirtAddr) -> KResult<PhysAddr> {
        let (table, index) = self.walk(virt, false)?.ok_or(Status::NotFound)?;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & DESC_VALID == 0 {
            return Err(Status::NotFound);
        }
        entries[index] = 0;
        Self::invalidate(virt);
        Ok(PhysAddr::new(entry & DESC_ADDR_MASK))
    }

    fn query_raw(&self, virt: VirtAddr) -> Option<(PhysAddr, MapAccess, CacheMode)> {
        let (table, index) = self.walk(virt, false).ok()??;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & DESC_VALID == 0 {
            return None;
        }
        Some((
            PhysAddr::new(entry & DESC_ADDR_MASK),
            access_from_desc(entry),
            cache_from_desc(entry),
        ))
    }

    #[inline]
    fn invalidate(virt: VirtAddr) {
        let page = virt.as_u64() >> 12;
        // SAFETY: invalidação de TLB não tem efeitos de memória
        unsafe {
            asm!(
                "dsb ishst",
                "tlbi vaae1is, {}",
                "dsb ish",
                "isb",
                in(reg) page,
                options(nostack),
            );
        }
    }

    #[inline]
    fn flush_all() {
        // SAFETY: idem invalidate
        unsafe {
            asm!("dsb ishst", "tlbi vmalle1is", "dsb ish", "isb", options(nostack));
        }
    }

    #[inline]
    unsafe fn switch_to(&self) {
        if self.kernel {
            return; // TTBR1 é fixo; contexto de kernel não troca raiz
        }
        let ttbr0 = self.root.as_u64() | ((self.asid as u64) << 48);
        asm!("msr ttbr0_el1, {}", "isb", in(reg) ttbr0, options(nostack));
    }
}
