//! Fonte de tempo aarch64: generic timer (CNTPCT/CNTFRQ).

use crate::arch::aarch64::cpu::Cpu;
use core::sync::atomic::{AtomicU64, Ordering};

/// Linha de IRQ do tick (PPI do timer físico EL1)
pub const IRQ_LINE: u32 = 30;
/// Frequência do tick periódico (Hz)
pub const TICK_HZ: u64 = 1000;
/// Duração de um tick em nanosegundos
pub const TICK_NS: u64 = 1_000_000_000 / TICK_HZ;

static EPOCH: AtomicU64 = AtomicU64::new(0);

/// Arma o timer físico para o tick periódico e fixa a origem do relógio.
pub fn init() {
    EPOCH.store(Cpu::counter(), Ordering::Relaxed);
    let interval = Cpu::counter_freq() / TICK_HZ;
    // SAFETY: registradores do generic timer em EL1
    unsafe {
        core::arch::asm!(
            "msr cntp_tval_el0, {0}",
            "mov {1}, #1",
            "msr cntp_ctl_el0, {1}",
            in(reg) interval,
            out(reg) _,
            options(nomem, nostack),
        );
    }
}

/// Rearma o próximo tick. O tval é one-shot; sem isto o tick para.
pub fn rearm_tick() {
    let interval = Cpu::counter_freq() / TICK_HZ;
    // SAFETY: escrita do comparador do generic timer em EL1
    unsafe {
        core::arch::asm!(
            "msr cntp_tval_el0, {0}",
            in(reg) interval,
            options(nomem, nostack),
        );
    }
}

/// Nanosegundos desde o init do timer.
pub fn now_ns() -> u64 {
    let freq = Cpu::counter_freq();
    let cycles = Cpu::counter().wrapping_sub(EPOCH.load(Ordering::Relaxed));
    (cycles / freq) * 1_000_000_000 + ((cycles % freq) * 1_000_000_000) / freq
}
