//! Mapa físico direto
//!
//! O loader mapeia toda a memória física num offset fixo da metade alta;
//! o kernel acessa frames arbitrários somando esse offset.

use crate::mm::{PhysAddr, VirtAddr};
use core::sync::atomic::{AtomicU64, Ordering};

/// Offset padrão quando o handoff não informa outro
const DEFAULT_OFFSET: u64 = 0xFFFF_8000_0000_0000;

static PHYS_OFFSET: AtomicU64 = AtomicU64::new(DEFAULT_OFFSET);

/// Registra o offset informado pelo loader. Primeira coisa do init de mm.
pub fn init(offset: u64) {
    if offset != 0 {
        PHYS_OFFSET.store(offset, Ordering::Release);
    }
}

/// Endereço virtual de um frame físico no mapa direto.
#[inline]
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + PHYS_OFFSET.load(Ordering::Relaxed))
}

/// Inverso de `phys_to_virt`, apenas para endereços dentro do mapa direto.
#[inline]
pub fn virt_to_phys(virt: VirtAddr) -> Option<PhysAddr> {
    let offset = PHYS_OFFSET.load(Ordering::Relaxed);
    virt.as_u64().checked_sub(offset).map(PhysAddr::new)
}
