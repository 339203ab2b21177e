//! Spinlock - bloqueio com busy-wait
//!
//! Desabilita interrupções locais enquanto o lock é mantido; o estado
//! anterior fica no guard e é restaurado no drop. Seções críticas devem ser
//! curtas e nunca podem dormir.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::traits::cpu::CpuOps;
use crate::arch::Cpu;

/// Spinlock - usa busy-wait, NÃO pode dormir
pub struct Spinlock<T> {
    locked: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: Spinlock protege acesso com lock atômico
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    /// Cria novo spinlock. O nome aparece em diagnósticos de deadlock.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                Cpu::pause();
            }
        }
    }

    /// Adquire o lock, desabilitando interrupções locais.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let interrupts_were_enabled = Cpu::interrupts_enabled();
        Cpu::disable_interrupts();
        self.acquire();
        SpinlockGuard {
            lock: self,
            interrupts_were_enabled,
        }
    }

    /// Adquire o lock assumindo que interrupções já estão desabilitadas.
    ///
    /// Para uso em handlers de interrupção e no corpo do scheduler.
    pub fn lock_noirq(&self) -> SpinlockGuard<'_, T> {
        debug_assert!(
            !Cpu::interrupts_enabled(),
            "lock_noirq com interrupcoes habilitadas"
        );
        self.acquire();
        SpinlockGuard {
            lock: self,
            interrupts_were_enabled: false,
        }
    }

    /// Tenta adquirir sem bloquear.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        let interrupts_were_enabled = Cpu::interrupts_enabled();
        Cpu::disable_interrupts();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinlockGuard {
                lock: self,
                interrupts_were_enabled,
            })
        } else {
            if interrupts_were_enabled {
                Cpu::enable_interrupts();
            }
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Força o desbloqueio sem guard.
    ///
    /// # Safety
    ///
    /// Só o scheduler pode usar, ao entrar numa thread que herdou o lock da
    /// troca de contexto e não possui o guard correspondente.
    pub unsafe fn force_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Guard RAII do spinlock
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
    interrupts_were_enabled: bool,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: guard ativo implica lock adquirido
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: guard ativo implica lock adquirido
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        if self.interrupts_were_enabled {
            Cpu::enable_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock() {
        let lock = Spinlock::new("teste", 41u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 42);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = Spinlock::new("teste", ());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
