//! Implementação x86_64 das operações de CPU (HAL).
//!
//! Assembly inline para controle de interrupções, MSRs e o ponteiro per-CPU
//! (via IA32_GS_BASE). Assume modo longo e Ring 0.

use crate::arch::traits::cpu::{CoreId, CpuOps};
use core::arch::asm;

// Testes de host rodam em Ring 3: CLI/STI seriam #GP. O flag de
// interrupção vira um bool simulado para os guards de spinlock.
#[cfg(test)]
static TEST_IF: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(true);

/// MSR: base do segmento GS (aponta para a estrutura per-CPU)
const IA32_GS_BASE: u32 = 0xC000_0101;

pub struct Cpu;

impl Cpu {
    /// Lê um Model Specific Register.
    ///
    /// # Safety
    /// MSR inválido causa #GP.
    #[inline]
    pub unsafe fn rdmsr(msr: u32) -> u64 {
        let (high, low): (u32, u32);
        asm!(
            "rdmsr",
            in("ecx") msr,
            out("eax") low,
            out("edx") high,
            options(nomem, nostack, preserves_flags),
        );
        ((high as u64) << 32) | (low as u64)
    }

    /// Escreve um Model Specific Register.
    ///
    /// # Safety
    /// MSR inválido ou valor malformado causa #GP.
    #[inline]
    pub unsafe fn wrmsr(msr: u32, value: u64) {
        let low = value as u32;
        let high = (value >> 32) as u32;
        asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") low,
            in("edx") high,
            options(nomem, nostack, preserves_flags),
        );
    }

    /// Lê o contador de timestamp (TSC)
    #[inline]
    pub fn rdtsc() -> u64 {
        let (high, low): (u32, u32);
        // SAFETY: RDTSC não tem efeitos colaterais
        unsafe {
            asm!("rdtsc", out("eax") low, out("edx") high, options(nomem, nostack));
        }
        ((high as u64) << 32) | (low as u64)
    }
}

impl CpuOps for Cpu {
    #[inline]
    fn halt() {
        // SAFETY: HLT em Ring 0
        unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }

    #[cfg(not(test))]
    #[inline]
    fn disable_interrupts() {
        // SAFETY: CLI em Ring 0
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    #[cfg(test)]
    fn disable_interrupts() {
        TEST_IF.store(false, core::sync::atomic::Ordering::Release);
    }

    #[cfg(not(test))]
    #[inline]
    fn enable_interrupts() {
        // SAFETY: STI em Ring 0
        unsafe { asm!("sti", options(nomem, nostack)) };
    }

    #[cfg(test)]
    fn enable_interrupts() {
        TEST_IF.store(true, core::sync::atomic::Ordering::Release);
    }

    #[cfg(not(test))]
    #[inline]
    fn interrupts_enabled() -> bool {
        let rflags: u64;
        // SAFETY: só lê RFLAGS
        unsafe {
            asm!("pushfq; pop {}", out(reg) rflags, options(nomem, preserves_flags));
        }
        rflags & (1 << 9) != 0
    }

    #[cfg(test)]
    fn interrupts_enabled() -> bool {
        TEST_IF.load(core::sync::atomic::Ordering::Acquire)
    }

    #[inline]
    fn pause() {
        core::hint::spin_loop();
    }

    #[inline]
    fn current_id() -> CoreId {
        let ptr = Self::percpu_ptr();
        if ptr.is_null() {
            // Antes do percpu ser instalado só a CPU de boot roda
            return 0;
        }
        // Layout de CpuLocal: o id lógico é o primeiro campo (u32)
        // SAFETY: set_percpu_ptr garante que o ponteiro é válido
        unsafe { core::ptr::read(ptr as *const u32) }
    }

    #[inline]
    fn percpu_ptr() -> *mut u8 {
        // SAFETY: IA32_GS_BASE é sempre válido em modo longo
        unsafe { Self::rdmsr(IA32_GS_BASE) as *mut u8 }
    }

    #[inline]
    unsafe fn set_percpu_ptr(ptr: *mut u8) {
        Self::wrmsr(IA32_GS_BASE, ptr as u64);
    }

    fn send_reschedule_ipi(target: CoreId) {
        super::interrupts::send_ipi(target, super::interrupts::VECTOR_RESCHED);
    }

    #[cfg(feature = "tlb_shootdown")]
    fn send_tlb_ipi(target: CoreId) {
        super::interrupts::send_ipi(target, super::interrupts::VECTOR_TLB_FLUSH);
    }
}
