//! Implementação aarch64 das operações de CPU (HAL).
//!
//! DAIF para interrupções, TPIDR_EL1 para o ponteiro per-CPU.

use crate::arch::traits::cpu::{CoreId, CpuOps};
use core::arch::asm;

pub struct Cpu;

impl Cpu {
    /// Lê o contador físico (CNTPCT_EL0)
    #[inline]
    pub fn counter() -> u64 {
        let value: u64;
        // SAFETY: leitura de registrador de sistema sem efeitos colaterais
        unsafe {
            asm!("mrs {}, cntpct_el0", out(reg) value, options(nomem, nostack));
        }
        value
    }

    /// Frequência do contador físico (CNTFRQ_EL0)
    #[inline]
    pub fn counter_freq() -> u64 {
        let value: u64;
        // SAFETY: idem counter
        unsafe {
            asm!("mrs {}, cntfrq_el0", out(reg) value, options(nomem, nostack));
        }
        value
    }
}

impl CpuOps for Cpu {
    #[inline]
    fn halt() {
        // SAFETY: WFI em EL1
        unsafe { asm!("wfi", options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    fn disable_interrupts() {
        // SAFETY: mascara IRQ/FIQ em EL1
        unsafe { asm!("msr daifset, #3", options(nomem, nostack)) };
    }

    #[inline]
    fn enable_interrupts() {
        // SAFETY: desmascara IRQ/FIQ em EL1
        unsafe { asm!("msr daifclr, #3", options(nomem, nostack)) };
    }

    #[inline]
    fn interrupts_enabled() -> bool {
        let daif: u64;
        // SAFETY: só lê DAIF
        unsafe { asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack)) };
        daif & (1 << 7) == 0
    }

    #[inline]
    fn pause() {
        core::hint::spin_loop();
    }

    #[inline]
    fn current_id() -> CoreId {
        let ptr = Self::percpu_ptr();
        if ptr.is_null() {
            return 0;
        }
        // SAFETY: set_percpu_ptr garante validade
        unsafe { core::ptr::read(ptr as *const u32) }
    }

    #[inline]
    fn percpu_ptr() -> *mut u8 {
        let value: u64;
        // SAFETY: TPIDR_EL1 é reservado para o kernel
        unsafe { asm!("mrs {}, tpidr_el1", out(reg) value, options(nomem, nostack)) };
        value as *mut u8
    }

    #[inline]
    unsafe fn set_percpu_ptr(ptr: *mut u8) {
        asm!("msr tpidr_el1, {}", in(reg) ptr as u64, options(nomem, nostack));
    }

    fn send_reschedule_ipi(target: CoreId) {
        super::interrupts::send_sgi(target, super::interrupts::SGI_RESCHED);
    }

    #[cfg(feature = "tlb_shootdown")]
    fn send_tlb_ipi(target: CoreId) {
        super::interrupts::send_sgi(target, super::interrupts::SGI_TLB_FLUSH);
    }
}
