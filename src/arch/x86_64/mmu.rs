//! Tabelas de página x86_64 (4 níveis, PAT).
//!
//! Implementa `PageTableOps` sobre uma raiz PML4. A política de locking e os
//! shootdowns ficam em `mm::mmu`; aqui só existe a mecânica de walk/instalação
//! de entradas e a programação do PAT.

use crate::arch::traits::mmu::{CacheMode, MapAccess, PageTableOps};
use crate::arch::x86_64::cpu::Cpu;
use crate::mm::physmap::phys_to_virt;
use crate::mm::pmm::{self, AllocFlags};
use crate::mm::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::{KResult, Status};
use core::arch::asm;
use core::sync::atomic::{AtomicU64, Ordering};

/// Início do espaço de usuário
pub const USER_BASE: u64 = 0x0000_0000_0010_0000;
/// Tamanho do espaço de usuário (termina no buraco canônico)
pub const USER_SIZE: u64 = 0x0000_8000_0000_0000 - USER_BASE;
/// Início do espaço de kernel (metade alta)
pub const KERNEL_BASE: u64 = 0xFFFF_8000_0000_0000;

// Bits de entrada de tabela
const PTE_PRESENT: u64 = 1 << 0;
const PTE_WRITE: u64 = 1 << 1;
const PTE_USER: u64 = 1 << 2;
const PTE_PWT: u64 = 1 << 3;
const PTE_PCD: u64 = 1 << 4;
const PTE_HUGE: u64 = 1 << 7;
const PTE_NX: u64 = 1 << 63;
const PTE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// MSR IA32_PAT
const IA32_PAT: u32 = 0x277;

/// Raiz PML4 do contexto de kernel (compartilhada na metade alta)
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

/// Registra a raiz do kernel para que novas raízes de usuário herdem a
/// metade alta. Chamado uma vez por `mm::mmu::init`.
pub fn set_kernel_root(root: PhysAddr) {
    KERNEL_ROOT.store(root.as_u64(), Ordering::Release);
}

/// Programa o PAT desta CPU com a tabela de índices fixa do kernel:
/// 0 = WB (Normal), 1 = UC- (Device), 2 = UC (Uncached), 3 = WC.
/// Chamado uma vez por CPU durante o init.
pub fn init_pat() {
    // Entradas de 8 bits: WB=0x06, UC-=0x07, UC=0x00, WC=0x01
    let pat: u64 = 0x06 | (0x07 << 8) | (0x00 << 16) | (0x01 << 24);
    // SAFETY: IA32_PAT existe em qualquer CPU de 64 bits que suportamos
    unsafe { Cpu::wrmsr(IA32_PAT, pat) };
}

/// Converte CacheMode para os bits PWT/PCD do índice PAT correspondente
fn cache_bits(cache: CacheMode) -> u64 {
    let index = cache as u64; // índices 0..=3, só PWT/PCD
    let mut bits = 0;
    if index & 1 != 0 {
        bits |= PTE_PWT;
    }
    if index & 2 != 0 {
        bits |= PTE_PCD;
    }
    bits
}

fn cache_from_bits(entry: u64) -> CacheMode {
    let index = ((entry & PTE_PWT) >> 3) | ((entry & PTE_PCD) >> 3);
    match index {
        0 => CacheMode::Normal,
        1 => CacheMode::Device,
        2 => CacheMode::Uncached,
        _ => CacheMode::WriteCombine,
    }
}

fn access_bits(virt: VirtAddr, access: MapAccess) -> u64 {
    let mut bits = PTE_PRESENT;
    if access.contains(MapAccess::WRITE) {
        bits |= PTE_WRITE;
    }
    if !access.contains(MapAccess::EXEC) {
        bits |= PTE_NX;
    }
    if virt.as_u64() < KERNEL_BASE {
        bits |= PTE_USER;
    }
    bits
}

fn access_from_bits(entry: u64) -> MapAccess {
    let mut access = MapAccess::READ;
    if entry & PTE_WRITE != 0 {
        access |= MapAccess::WRITE;
    }
    if entry & PTE_NX == 0 {
        access |= MapAccess::EXEC;
    }
    access
}

/// Índices dos 4 níveis para um endereço virtual
fn table_indices(virt: u64) -> [usize; 4] {
    [
        ((virt >> 39) & 0x1FF) as usize,
        ((virt >> 30) & 0x1FF) as usize,
        ((virt >> 21) & 0x1FF) as usize,
        ((virt >> 12) & 0x1FF) as usize,
    ]
}

/// Acessa uma tabela física como slice de entradas via physmap
///
/// # Safety
/// `table` deve apontar para uma página de tabela válida.
unsafe fn table_mut(table: PhysAddr) -> &'static mut [u64; 512] {
    &mut *(phys_to_virt(table).as_u64() as *mut [u64; 512])
}

/// Raiz de tabela de páginas x86_64
pub struct PageTable {
    root: PhysAddr,
}

// SAFETY: o acesso é serializado pelo lock do MmuContext dono
unsafe impl Send for PageTable {}

impl PageTable {
    /// Adota a raiz ativa no boot como raiz do contexto de kernel.
    ///
    /// # Safety
    /// Só pode existir um dono da raiz ativa; chamada única durante o init.
    pub unsafe fn adopt_active() -> Self {
        let cr3: u64;
        asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack));
        Self {
            root: PhysAddr::new(cr3 & PTE_ADDR_MASK),
        }
    }

    /// Desce um nível, alocando a tabela se `allocate`
    fn descend(table: PhysAddr, index: usize, allocate: bool) -> KResult<Option<PhysAddr>> {
        // SAFETY: caminhamos apenas por tabelas que nós mesmos instalamos
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];

        if entry & PTE_PRESENT != 0 {
            debug_assert!(entry & PTE_HUGE == 0, "huge page no caminho de 4K");
            return Ok(Some(PhysAddr::new(entry & PTE_ADDR_MASK)));
        }
        if !allocate {
            return Ok(None);
        }

        let new_table = pmm::alloc(1, AllocFlags::ZERO).ok_or(Status::NoMemory)?;
        // Tabelas intermediárias levam o máximo de permissão; a folha decide
        entries[index] = new_table.as_u64() | PTE_PRESENT | PTE_WRITE | PTE_USER;
        Ok(Some(new_table))
    }

    /// Caminha até a tabela folha (nível PT)
    fn walk(&self, virt: VirtAddr, allocate: bool) -> KResult<Option<(PhysAddr, usize)>> {
        let idx = table_indices(virt.as_u64());
        let mut table = self.root;
        for level in 0..3 {
            match Self::descend(table, idx[level], allocate)? {
                Some(next) => table = next,
                None => return Ok(None),
            }
        }
        Ok(Some((table, idx[3])))
    }

    /// Libera recursivamente as tabelas da metade de usuário.
    ///
    /// Só libera páginas de tabela; frames folha pertencem aos donos dos
    /// mapeamentos e já devem ter sido desmapeados.
    pub fn free_user_tables(&mut self) {
        fn free_level(table: PhysAddr, level: u32) {
            // SAFETY: tabela instalada por nós
            let entries = unsafe { table_mut(table) };
            for entry in entries.iter() {
                if entry & PTE_PRESENT != 0 && level < 3 {
                    free_level(PhysAddr::new(entry & PTE_ADDR_MASK), level + 1);
                }
            }
            pmm::free(table, 1);
        }

        // SAFETY: raiz válida deste contexto
        let root_entries = unsafe { table_mut(self.root) };
        for entry in root_entries.iter_mut().take(256) {
            if *entry & PTE_PRESENT != 0 {
                free_level(PhysAddr::new(*entry & PTE_ADDR_MASK), 1);
                *entry = 0;
            }
        }
    }
}

impl PageTableOps for PageTable {
    fn new_root(kernel: bool) -> KResult<Self> {
        let root = pmm::alloc(1, AllocFlags::ZERO).ok_or(Status::NoMemory)?;

        if !kernel {
            let kernel_root = KERNEL_ROOT.load(Ordering::Acquire);
            debug_assert!(kernel_root != 0, "raiz do kernel ainda não registrada");
            // Herdar a metade alta (entradas 256..512) da raiz do kernel
            // SAFETY: ambas as raízes são páginas de tabela válidas
            unsafe {
                let src = table_mut(PhysAddr::new(kernel_root));
                let dst = table_mut(root);
                dst[256..].copy_from_slice(&src[256..]);
            }
        }

        Ok(Self { root })
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

        // Com allocate=true o walk só retorna None em falta de memória
        let (table, index) = self.walk(virt, true)?.ok_or(Status::NoMemory)?;
        // SAFETY: tabela folha válida retornada pelo walk
        let entries = unsafe { table_mut(table) };
        if entries[index] & PTE_PRESENT != 0 {
            return Err(Status::AlreadyExists);
        }
        entries[index] = (phys.as_u64() & PTE_ADDR_MASK)
            | access_bits(virt, access)
            | cache_bits(cache);
        Ok(())
    }

    fn protect_raw(&mut self, virt: VirtAddr, access: MapAccess) -> KResult<()> {
        let (table, index) = self.walk(virt, false)?.ok_or(Status::NotFound)?;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & PTE_PRESENT == 0 {
            return Err(Status::NotFound);
        }
        let keep = entry & (PTE_ADDR_MASK | PTE_PWT | PTE_PCD);
        entries[index] = keep | access_bits(virt, access);
        Self::invalidate(virt);
        Ok(())
    }

    fn unmap_raw(&mut self, virt: VirtAddr) -> KResult<PhysAddr> {
        let (table, index) = self.walk(virt, false)?.ok_or(Status::NotFound)?;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & PTE_PRESENT == 0 {
            return Err(Status::NotFound);
        }
        entries[index] = 0;
        Self::invalidate(virt);
        Ok(PhysAddr::new(entry & PTE_ADDR_MASK))
    }

    fn query_raw(&self, virt: VirtAddr) -> Option<(PhysAddr, MapAccess, CacheMode)> {
        let (table, index) = self.walk(virt, false).ok()??;
        // SAFETY: tabela folha válida
        let entries = unsafe { table_mut(table) };
        let entry = entries[index];
        if entry & PTE_PRESENT == 0 {
            return None;
        }
        Some((
            PhysAddr::new(entry & PTE_ADDR_MASK),
            access_from_bits(entry),
            cache_from_bits(entry),
        ))
    }

    #[inline]
    fn invalidate(virt: VirtAddr) {
        // SAFETY: INVLPG é sempre seguro
        unsafe {
            asm!("invlpg [{}]", in(reg) virt.as_u64(), options(nostack, preserves_flags));
        }
    }

    #[inline]
    fn flush_all() {
        // Recarregar CR3 descarta o TLB (exceto entradas globais)
        // SAFETY: só reescreve o valor corrente
        unsafe {
            let cr3: u64;
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack));
            asm!("mov cr3, {}", in(reg) cr3, options(nomem, nostack));
        }
    }

    #[inline]
    unsafe fn switch_to(&self) {
        asm!("mov cr3, {}", in(reg) self.root.as_u64(), options(nostack));
    }
}
