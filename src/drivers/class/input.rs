//! Classe de entrada
//!
//! Devices de entrada empurram eventos de contexto de IRQ para uma fila
//! limitada; leitores bloqueiam na retirada. Fila cheia descarta o evento
//! mais antigo.

use crate::core::sched::WaitQueue;
use crate::core::time;
use crate::drivers::base::Device;
use crate::sync::Spinlock;
use crate::{KResult, Status};
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// Eventos na fila no máximo
const QUEUE_MAX: usize = 256;

/// Um evento de entrada (tecla, movimento, botão)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

/// Um device de entrada
pub struct InputDevice {
    pub device: Arc<Device>,
    queue: Spinlock<VecDeque<InputEvent>>,
    ready: WaitQueue,
}

impl InputDevice {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        Arc::new(Self {
            device,
            queue: Spinlock::new("input_queue", VecDeque::new()),
            ready: WaitQueue::new(),
        })
    }

    /// Empurra um evento. Chamável de contexto de IRQ.
    pub fn push(&self, event: InputEvent) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= QUEUE_MAX {
                queue.pop_front();
            }
            queue.push_back(event);
        }
        self.ready.wake_one();
    }

    /// Retira o evento mais antigo. Timeout 0 devolve `WouldBlock` com a
    /// fila vazia; negativo espera para sempre.
    pub fn pop(&self, timeout_ns: i64) -> KResult<InputEvent> {
        let deadline = if timeout_ns < 0 {
            None
        } else {
            Some(time::now_ns() + timeout_ns as u64)
        };
        loop {
            if let Some(event) = self.queue.lock().pop_front() {
                return Ok(event);
            }
            match deadline {
                None => self.ready.sleep(-1, true)?,
                Some(deadline) => {
                    if timeout_ns == 0 {
                        return Err(Status::WouldBlock);
                    }
                    let now = time::now_ns();
                    if now >= deadline {
                        return Err(Status::TimedOut);
                    }
                    self.ready.sleep((deadline - now) as i64, true)?;
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cada teste usa um nome próprio; a árvore de devices é global e
    // rejeita nomes duplicados.
    fn sample(name: &'static str) -> Arc<InputDevice> {
        let parent = crate::drivers::base::virtual_dir();
        let device = crate::drivers::base::DeviceBuilder::new(name, &parent)
            .class("input")
            .publish()
            .unwrap();
        InputDevice::new(device)
    }

    #[test]
    fn fifo_order_and_poll() {
        let input = sample("inputloop0");
        assert_eq!(input.pop(0), Err(Status::WouldBlock));
        input.push(InputEvent {
            kind: 1,
            code: 30,
            value: 1,
        });
        input.push(InputEvent {
            kind: 1,
            code: 30,
            value: 0,
        });
        assert_eq!(input.pending(), 2);
        assert_eq!(input.pop(0).unwrap().value, 1);
        assert_eq!(input.pop(0).unwrap().value, 0);
        assert_eq!(input.pop(0), Err(Status::WouldBlock));
    }

    #[test]
    fn overflow_drops_oldest() {
        let input = sample("inputloop1");
        for i in 0..(QUEUE_MAX + 1) {
            input.push(InputEvent {
                kind: 0,
                code: 0,
                value: i as i32,
            });
        }
        assert_eq!(input.pending(), QUEUE_MAX);
        assert_eq!(input.pop(0).unwrap().value, 1);
    }
}
