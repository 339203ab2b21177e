//! Semáforo contador

use crate::core::sched::WaitQueue;
use crate::sync::Spinlock;
use crate::{KResult, Status};

/// Semáforo contador dormível
pub struct Semaphore {
    count: Spinlock<usize>,
    queue: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: Spinlock::new("semaphore", initial),
            queue: WaitQueue::new(),
        }
    }

    fn try_down(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Decrementa, dormindo se o contador está em zero.
    ///
    /// `timeout_ns`: 0 = poll (`WouldBlock` imediato), negativo = espera
    /// infinita. Interrompível por kill (`Interrupted`).
    pub fn down(&self, timeout_ns: i64) -> KResult<()> {
        if self.try_down() {
            return Ok(());
        }
        if timeout_ns == 0 {
            return Err(Status::WouldBlock);
        }

        let deadline = if timeout_ns > 0 {
            Some(crate::core::time::now_ns() + timeout_ns as u64)
        } else {
            None
        };

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = crate::core::time::now_ns();
                    if now >= deadline {
                        return Err(Status::TimedOut);
                    }
                    (deadline - now) as i64
                }
                None => -1,
            };
            self.queue.sleep(remaining, true)?;
            if self.try_down() {
                return Ok(());
            }
        }
    }

    /// Incrementa `n`, acordando até `n` threads.
    pub fn up(&self, n: usize) {
        {
            let mut count = self.count.lock();
            *count += n;
        }
        for _ in 0..n {
            if !self.queue.wake_one() {
                break;
            }
        }
    }

    /// Valor corrente (diagnóstico; desatualiza na hora).
    pub fn value(&self) -> usize {
        *self.count.lock()
    }
}
