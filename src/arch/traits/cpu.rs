//! Interface Abstrata de CPU (HAL).
//! Define as operações que qualquer arquitetura (x86_64, aarch64) deve implementar.

/// Identificador de core (índice lógico, 0 = CPU de boot)
pub type CoreId = u32;

pub trait CpuOps {
    /// Para a execução da CPU até a próxima interrupção.
    /// Economiza energia em loops ociosos.
    fn halt();

    /// Desabilita interrupções globalmente.
    /// Crítico para seções atômicas no kernel.
    fn disable_interrupts();

    /// Habilita interrupções globalmente.
    fn enable_interrupts();

    /// Verifica se as interrupções estão habilitadas.
    fn interrupts_enabled() -> bool;

    /// Hint de busy-wait (PAUSE/YIELD).
    fn pause();

    /// Índice lógico da CPU corrente.
    fn current_id() -> CoreId;

    /// Ponteiro per-CPU corrente (base da estrutura `core::smp::CpuLocal`).
    fn percpu_ptr() -> *mut u8;

    /// Instala o ponteiro per-CPU desta CPU.
    ///
    /// # Safety
    /// `ptr` deve apontar para uma estrutura per-CPU válida pela vida da CPU.
    unsafe fn set_percpu_ptr(ptr: *mut u8);

    /// Envia uma IPI de rescheduling para outra CPU.
    fn send_reschedule_ipi(target: CoreId);

    /// Envia uma IPI de TLB shootdown para outra CPU.
    #[cfg(feature = "tlb_shootdown")]
    fn send_tlb_ipi(target: CoreId);

    /// Entra em loop infinito de halt com interrupções desabilitadas.
    /// Usado em pânicos irrecuperáveis.
    fn hang() -> ! {
        Self::disable_interrupts();
        loop {
            Self::halt();
        }
    }
}
