//! Contextos de MMU
//!
//! Um `MmuContext` por espaço de endereçamento mais o contexto de kernel,
//! compartilhado por todos. As operações adquirem o lock do contexto e
//! acumulam invalidações; o unlock emite o shootdown de TLB diferido para as
//! outras CPUs (feature `tlb_shootdown`) ou invalida só localmente.

use crate::arch::mmu::{PageTable, KERNEL_BASE, USER_BASE, USER_SIZE};
use crate::arch::traits::mmu::{CacheMode, MapAccess, PageTableOps};
use crate::mm::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::sync::Spinlock;
use crate::{KResult, Status};
use alloc::vec::Vec;
use spin::Once;

/// Acima disso o unlock desiste da lista e faz flush completo
const PENDING_LIMIT: usize = 32;

struct MmuInner {
    table: PageTable,
    pending: Vec<u64>,
    full_flush: bool,
}

/// Um espaço de endereçamento
pub struct MmuContext {
    user: bool,
    inner: Spinlock<MmuInner>,
}

static KERNEL_CTX: Once<MmuContext> = Once::new();

/// Cria o contexto de kernel adotando a raiz ativa do loader.
pub fn init() {
    KERNEL_CTX.call_once(|| {
        // SAFETY: chamada única no boot; o contexto criado passa a ser o dono
        let table = unsafe { PageTable::adopt_active() };
        crate::arch::mmu::set_kernel_root(table.root_phys());
        MmuContext {
            user: false,
            inner: Spinlock::new("mmu_kernel", MmuInner {
                table,
                pending: Vec::new(),
                full_flush: false,
            }),
        }
    });
}

/// Contexto de kernel, válido após `mmu::init`.
pub fn kernel_context() -> &'static MmuContext {
    match KERNEL_CTX.get() {
        Some(ctx) => ctx,
        None => crate::core::panic_hard("mmu: contexto de kernel antes do init"),
    }
}

impl MmuContext {
    /// Novo contexto de usuário com a metade de kernel herdada.
    pub fn new_user() -> KResult<Self> {
        let table = PageTable::new_root(false)?;
        Ok(Self {
            user: true,
            inner: Spinlock::new("mmu_user", MmuInner {
                table,
                pending: Vec::new(),
                full_flush: false,
            }),
        })
    }

    pub fn is_user(&self) -> bool {
        self.user
    }

    /// Raiz física, para diagnóstico e troca de contexto.
    pub fn root_phys(&self) -> PhysAddr {
        self.inner.lock().table.root_phys()
    }

    fn check_range(&self, virt: VirtAddr) -> KResult<()> {
        let addr = virt.as_u64();
        if self.user {
            if addr < USER_BASE || addr >= USER_BASE + USER_SIZE {
                return Err(Status::InvalidAddr);
            }
        } else if addr < KERNEL_BASE {
            return Err(Status::InvalidAddr);
        }
        Ok(())
    }

    /// Executa `f` com o lock e emite as invalidações acumuladas na saída.
    fn with_locked<R>(&self, f: impl FnOnce(&mut MmuInner) -> R) -> R {
        let (result, pending, full_flush) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner);
            let pending = core::mem::take(&mut inner.pending);
            let full_flush = core::mem::replace(&mut inner.full_flush, false);
            (result, pending, full_flush)
        };
        self.flush(pending, full_flush);
        result
    }

    fn flush(&self, pending: Vec<u64>, full_flush: bool) {
        if pending.is_empty() && !full_flush {
            return;
        }
        if full_flush {
            PageTable::flush_all();
        } else {
            for &addr in &pending {
                PageTable::invalidate(VirtAddr::new(addr));
            }
        }
        // As outras CPUs podem ter entradas velhas deste contexto
        #[cfg(feature = "tlb_shootdown")]
        {
            use crate::arch::traits::cpu::CpuOps;
            let current = crate::arch::Cpu::current_id();
            for cpu in crate::core::smp::online_cpus() {
                if cpu != current {
                    crate::arch::Cpu::send_tlb_ipi(cpu);
                }
            }
        }
    }

    fn note_invalidate(inner: &mut MmuInner, virt: VirtAddr) {
        if inner.full_flush {
            return;
        }
        if inner.pending.len() >= PENDING_LIMIT {
            inner.full_flush = true;
            inner.pending.clear();
        } else {
            inner.pending.push(virt.as_u64());
        }
    }

    /// Mapeia uma página. Falha com `AlreadyExists` se o slot está ocupado.
    pub fn map(
        &self,
        virt: VirtAddr,
        phys: PhysAddr,
        access: MapAccess,
        cache: CacheMode,
    ) -> KResult<()> {
        self.check_range(virt)?;
        self.with_locked(|inner| inner.table.map_raw(virt, phys, access, cache))
    }

    /// Ajusta as permissões de um range já mapeado.
    ///
    /// Sem `allow_widen`, conceder um direito que o mapeamento atual não tem
    /// é rejeitado com `PermDenied`.
    pub fn remap(
        &self,
        virt: VirtAddr,
        size: usize,
        access: MapAccess,
        allow_widen: bool,
    ) -> KResult<()> {
        self.check_range(virt)?;
        debug_assert!(size % PAGE_SIZE == 0);
        self.with_locked(|inner| {
            let pages = size / PAGE_SIZE;
            for page in 0..pages {
                let addr = VirtAddr::new(virt.as_u64() + (page * PAGE_SIZE) as u64);
                let (_, current, _) = inner.table.query_raw(addr).ok_or(Status::NotFound)?;
                if !allow_widen && !current.contains(access) {
                    return Err(Status::PermDenied);
                }
                inner.table.protect_raw(addr, access)?;
                Self::note_invalidate(inner, addr);
            }
            Ok(())
        })
    }

    /// Desfaz o mapeamento e devolve o frame que estava mapeado.
    pub fn unmap(&self, virt: VirtAddr) -> Option<PhysAddr> {
        if self.check_range(virt).is_err() {
            return None;
        }
        self.with_locked(|inner| {
            let frame = inner.table.unmap_raw(virt).ok()?;
            Self::note_invalidate(inner, virt);
            Some(frame)
        })
    }

    /// Tradução atual de `virt`, se mapeado.
    pub fn query(&self, virt: VirtAddr) -> Option<(PhysAddr, MapAccess, CacheMode)> {
        self.inner.lock().table.query_raw(virt)
    }

    /// Ativa este espaço de endereçamento na CPU corrente.
    pub fn switch(&self, prev: Option<&MmuContext>) {
        if let Some(prev) = prev {
            if core::ptr::eq(prev, self) {
                return;
            }
        }
        let inner = self.inner.lock();
        // SAFETY: a raiz pertence a este contexto e a metade de kernel está
        // presente em qualquer raiz
        unsafe { inner.table.switch_to() };
    }

    /// Libera as tabelas da metade de usuário. Chamado no teardown do
    /// processo, com o contexto já fora de uso.
    pub fn teardown_user(&self) {
        debug_assert!(self.user);
        let mut inner = self.inner.lock();
        inner.table.free_user_tables();
        inner.full_flush = true;
    }
}

/// Alvo da IPI de shootdown: invalida todo o TLB local.
#[cfg(feature = "tlb_shootdown")]
pub fn tlb_flush_from_ipi() {
    PageTable::flush_all();
}

#[cfg(not(feature = "tlb_shootdown"))]
pub fn tlb_flush_from_ipi() {}
