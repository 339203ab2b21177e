//! Interface Abstrata da MMU (HAL).
//!
//! O backend de cada arquitetura implementa `PageTableOps` sobre a raiz da
//! tabela de páginas. A política (locks, shootdown, donos de página) fica em
//! `mm::mmu`; aqui é só mecânica de tabela.

use bitflags::bitflags;
use crate::mm::{PhysAddr, VirtAddr};
use crate::KResult;

bitflags! {
    /// Máscara de acesso de um mapeamento
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapAccess: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

/// Modo de cache de um mapeamento.
///
/// Traduzido por arquitetura: índices PAT no x86_64, índices MAIR no aarch64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheMode {
    /// Write-back normal
    Normal = 0,
    /// Device (nGnRE no ARM, UC- no x86)
    Device = 1,
    /// Totalmente sem cache
    Uncached = 2,
    /// Write-combine (framebuffers)
    WriteCombine = 3,
}

/// Operações cruas de tabela de páginas.
///
/// Todas as funções assumem que o chamador serializa o acesso à raiz
/// (o lock vive no `MmuContext`).
pub trait PageTableOps: Sized {
    /// Aloca uma raiz vazia (entradas de kernel copiadas da raiz do kernel).
    fn new_root(kernel: bool) -> KResult<Self>;

    /// Valor arquitetural da raiz (CR3 / TTBR0).
    fn root_phys(&self) -> PhysAddr;

    /// Instala um mapeamento de 4 KiB. Falha com `AlreadyExists` se o slot
    /// estiver ocupado.
    fn map_raw(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        access: MapAccess,
        cache: CacheMode,
    ) -> KResult<()>;

    /// Troca apenas os bits de proteção de um mapeamento existente.
    fn protect_raw(&mut self, virt: VirtAddr, access: MapAccess) -> KResult<()>;

    /// Remove um mapeamento, devolvendo o físico que estava instalado.
    fn unmap_raw(&mut self, virt: VirtAddr) -> KResult<PhysAddr>;

    /// Consulta um mapeamento.
    fn query_raw(&self, virt: VirtAddr) -> Option<(PhysAddr, MapAccess, CacheMode)>;

    /// Invalida uma linha de TLB local.
    fn invalidate(virt: VirtAddr);

    /// Descarta todo o TLB local.
    fn flush_all();

    /// Ativa esta raiz na CPU corrente.
    ///
    /// # Safety
    /// A raiz deve mapear o código do kernel em execução.
    unsafe fn switch_to(&self);
}
