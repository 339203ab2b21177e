//! Chamadas adiadas (DPC)
//!
//! Trabalho enfileirado por handlers de interrupção e drenado na saída da
//! IRQ e no loop idle, já com interrupções habilitadas.

use crate::arch::traits::cpu::CpuOps;
use crate::core::smp::MAX_CPUS;
use crate::sync::Spinlock;
use alloc::collections::VecDeque;

/// Uma chamada adiada
#[derive(Clone, Copy)]
pub struct Dpc {
    pub func: fn(usize),
    pub data: usize,
}

#[allow(clippy::declare_interior_mutable_const)]
const QUEUE_INIT: Spinlock<VecDeque<Dpc>> = Spinlock::new("dpc", VecDeque::new());
static QUEUES: [Spinlock<VecDeque<Dpc>>; MAX_CPUS] = [QUEUE_INIT; MAX_CPUS];

fn local_queue() -> &'static Spinlock<VecDeque<Dpc>> {
    &QUEUES[crate::arch::Cpu::current_id() as usize % MAX_CPUS]
}

/// Enfileira um DPC na CPU corrente. Seguro em contexto de interrupção.
pub fn queue(func: fn(usize), data: usize) {
    local_queue().lock().push_back(Dpc { func, data });
}

/// Drena a fila da CPU corrente. Chamado na saída de IRQ e no idle.
pub fn drain() {
    loop {
        let dpc = local_queue().lock().pop_front();
        match dpc {
            Some(dpc) => (dpc.func)(dpc.data),
            None => break,
        }
    }
}

/// Há trabalho pendente nesta CPU?
pub fn pending() -> bool {
    !local_queue().lock().is_empty()
}
