//! Mutex dormível
//!
//! Contenção coloca a thread numa fila FIFO; o unlock acorda a primeira.
//! O modo recursivo (dono pode readquirir) existe para o `Notifier`, cujos
//! callbacks podem desregistrar irmãos durante um `run`.

use crate::core::sched::WaitQueue;
use crate::core::thread::Tid;
use crate::sync::Spinlock;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

struct MutexState {
    owner: Option<Tid>,
    depth: u32,
}

/// Mutex dormível com fila FIFO
pub struct Mutex<T> {
    state: Spinlock<MutexState>,
    queue: WaitQueue,
    recursive: bool,
    data: UnsafeCell<T>,
}

// SAFETY: acesso ao dado condicionado à posse do mutex
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

fn current_tid() -> Tid {
    // Antes do scheduler só o fluxo de boot roda; 0 o representa
    crate::core::sched::current_thread().map_or(0, |thread| thread.id)
}

impl<T> Mutex<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            state: Spinlock::new(name, MutexState {
                owner: None,
                depth: 0,
            }),
            queue: WaitQueue::new(),
            recursive: false,
            data: UnsafeCell::new(data),
        }
    }

    /// Variante recursiva: o dono pode readquirir, com contagem de
    /// profundidade.
    pub const fn new_recursive(name: &'static str, data: T) -> Self {
        Self {
            state: Spinlock::new(name, MutexState {
                owner: None,
                depth: 0,
            }),
            queue: WaitQueue::new(),
            recursive: true,
            data: UnsafeCell::new(data),
        }
    }

    fn try_acquire(&self, me: Tid) -> bool {
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
            Some(owner) if owner == me && self.recursive => {
                state.depth += 1;
                true
            }
            Some(owner) => {
                debug_assert!(owner != me, "mutex nao recursivo readquirido");
                false
            }
        }
    }

    /// Adquire o mutex, dormindo se preciso. Não interrompível.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let me = current_tid();
        while !self.try_acquire(me) {
            // Espera não interrompível; o resultado só pode ser Ok
            let _ = self.queue.sleep(-1, false);
        }
        MutexGuard { mutex: self }
    }

    /// Tenta adquirir sem dormir.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.try_acquire(current_tid()) {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    fn release(&self) {
        let wake = {
            let mut state = self.state.lock();
            debug_assert!(state.depth > 0);
            state.depth -= 1;
            if state.depth == 0 {
                state.owner = None;
                true
            } else {
                false
            }
        };
        if wake {
            self.queue.wake_one();
        }
    }
}

/// Guard RAII do mutex
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: guard ativo implica posse do mutex
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: guard ativo implica posse do mutex
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}
