//! Fontes de tempo x86_64: PIT (tick periódico) e TSC (relógio).
//!
//! O PIT gera o tick de escalonamento na linha 0 do PIC; o TSC fornece o
//! relógio de nanosegundos usado por timers e timeouts.

use crate::arch::x86_64::cpu::Cpu;
use crate::arch::x86_64::io::outb;
use core::sync::atomic::{AtomicU64, Ordering};

/// Linha de IRQ do tick (PIT no PIC mestre)
pub const IRQ_LINE: u32 = 0;
/// Frequência do tick periódico (Hz)
pub const TICK_HZ: u64 = 1000;
/// Duração de um tick em nanosegundos
pub const TICK_NS: u64 = 1_000_000_000 / TICK_HZ;

const PIT_FREQ: u64 = 1_193_182;
const PIT_CMD: u16 = 0x43;
const PIT_CH0: u16 = 0x40;

/// Ciclos de TSC por microsegundo (calibrado no boot; default 1 GHz)
static TSC_PER_US: AtomicU64 = AtomicU64::new(1000);
/// TSC no instante do init (origem do relógio)
static TSC_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Programa o PIT para o tick periódico e fixa a origem do relógio.
pub fn init() {
    let divisor = PIT_FREQ / TICK_HZ;
    outb(PIT_CMD, 0x36); // canal 0, lobyte/hibyte, square wave
    outb(PIT_CH0, (divisor & 0xFF) as u8);
    outb(PIT_CH0, ((divisor >> 8) & 0xFF) as u8);

    TSC_EPOCH.store(Cpu::rdtsc(), Ordering::Relaxed);
}

/// Registra a frequência do TSC medida pelo loader/calibração.
pub fn set_tsc_frequency(cycles_per_us: u64) {
    if cycles_per_us > 0 {
        TSC_PER_US.store(cycles_per_us, Ordering::Relaxed);
    }
}

/// O PIT em square wave já é periódico; nada a rearmar.
pub fn rearm_tick() {}

/// Nanosegundos desde o init do timer.
pub fn now_ns() -> u64 {
    let cycles = Cpu::rdtsc().wrapping_sub(TSC_EPOCH.load(Ordering::Relaxed));
    let per_us = TSC_PER_US.load(Ordering::Relaxed);
    // cycles / (per_us / 1000) sem perder precisão
    (cycles / per_us) * 1000 + ((cycles % per_us) * 1000) / per_us
}
