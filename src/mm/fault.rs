//! Tratamento de page fault
//!
//! Faltas em endereço de kernel são sempre fatais. Faltas de usuário são
//! despachadas como exceção para a thread corrente; sem handler instalado o
//! processo morre.

use crate::arch::mmu::KERNEL_BASE;
use crate::core::thread::exceptions::{self, ExceptionCode};

/// Entrada comum chamada pelo vetor de page fault da arquitetura.
pub fn handle_page_fault(addr: u64, error: u64, rip: u64) {
    #[cfg(feature = "guard_pages")]
    if crate::core::thread::in_stack_guard(addr) {
        crate::kerror!("estouro de pilha detectado em", addr);
        crate::core::panic_hard("guard page de pilha de kernel atingida");
    }

    if addr >= KERNEL_BASE {
        crate::kerror!("page fault de kernel em", addr, "rip=", rip);
        crate::core::panic_hard("page fault em endereco de kernel");
    }

    crate::kdebug!("page fault de usuario em", addr, "err=", error);
    exceptions::dispatch(ExceptionCode::PageFault, rip, addr);
}
