//! Relógio e timers
//!
//! O relógio de nanosegundos vem da fonte da arquitetura. O tick periódico
//! chega como IRQ comum pelo gerenciador genérico; daqui saem o tick do
//! scheduler e a expiração de timers.

pub mod timer;

pub use timer::{TimerId, TimerObject};

use crate::drivers::irq::IrqReturn;
use crate::kinfo;

/// Nanosegundos desde o boot.
pub fn now_ns() -> u64 {
    crate::arch::timer::now_ns()
}

/// Ticks por segundo do tick periódico.
pub fn tick_hz() -> u64 {
    crate::arch::timer::TICK_HZ
}

fn tick_irq(_data: usize) -> IrqReturn {
    crate::arch::timer::rearm_tick();
    timer::tick();
    crate::core::sched::tick();
    if crate::core::sched::should_preempt() {
        IrqReturn::Reschedule
    } else {
        IrqReturn::Handled
    }
}

/// Programa a fonte de tick e registra o handler na linha do timer.
pub fn init() {
    crate::arch::timer::init();
    if crate::drivers::irq::install(crate::arch::timer::IRQ_LINE, tick_irq, 0).is_err() {
        crate::kwarn!("time: linha do tick fora das tabelas");
    }
    crate::drivers::irq::enable_line(crate::arch::timer::IRQ_LINE);
    kinfo!("time: tick @", crate::arch::timer::TICK_HZ);
}

/// APs programam sua própria fonte de tick; a linha já está registrada.
pub fn init_ap() {
    crate::arch::timer::init();
}
