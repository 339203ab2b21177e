//! Filas de espera
//!
//! Uma `WaitQueue` guarda as threads dormindo por um evento. O timeout e a
//! interrupção por kill são resolvidos pelo `park_current`; aqui só fica a
//! associação thread↔fila e a retirada na hora do wake.

use crate::core::thread::Thread;
use crate::sync::Spinlock;
use crate::KResult;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// Fila de threads esperando um evento
pub struct WaitQueue {
    waiters: Spinlock<VecDeque<Arc<Thread>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Spinlock::new("waitqueue", VecDeque::new()),
        }
    }

    /// Dorme até `wake_one`/`wake_all`, timeout ou kill.
    ///
    /// `timeout_ns`: 0 nunca dorme (`TimedOut` imediato), negativo espera
    /// para sempre. O chamador reavalia a condição ao acordar.
    pub fn sleep(&self, timeout_ns: i64, interruptible: bool) -> KResult<()> {
        let thread = match crate::core::sched::current_thread() {
            Some(thread) => thread,
            None => return Err(crate::Status::NotSupported),
        };
        self.waiters.lock().push_back(thread.clone());
        let result = crate::core::sched::park_current(timeout_ns, interruptible);
        if result.is_err() {
            // Timeout ou interrupção: sair da fila se o waker não tirou
            self.waiters.lock().retain(|waiter| waiter.id != thread.id);
        }
        result
    }

    /// Acorda a thread esperando há mais tempo. False se não havia nenhuma.
    pub fn wake_one(&self) -> bool {
        loop {
            let thread = self.waiters.lock().pop_front();
            match thread {
                // Perdeu a corrida com timeout/kill: tenta a próxima
                Some(thread) => {
                    if crate::core::sched::wake(&thread, Ok(())) {
                        return true;
                    }
                }
                None => return false,
            }
        }
    }

    /// Acorda todas. Retorna quantas de fato acordaram.
    pub fn wake_all(&self) -> usize {
        let mut woken = 0;
        loop {
            let thread = self.waiters.lock().pop_front();
            match thread {
                Some(thread) => {
                    if crate::core::sched::wake(&thread, Ok(())) {
                        woken += 1;
                    }
                }
                None => return woken,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
