//! Objetos de condição
//!
//! Um booleano observável via `object_wait`. Em modo nível, armar o evento
//! com a condição já verdadeira sinaliza na hora; em modo borda só a
//! transição false→true conta. Conditions não são transferíveis entre
//! processos.

use crate::core::object::{EventList, EventRegistration, KernelObject, ObjectType};
use crate::KResult;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Evento "condição verdadeira"
pub const EVENT_SET: u32 = 0;

pub struct Condition {
    state: AtomicBool,
    events: EventList,
}

impl Condition {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicBool::new(false),
            events: EventList::new(),
        })
    }

    /// Atualiza o estado. A transição false→true dispara os eventos.
    pub fn set(&self, state: bool) {
        let previous = self.state.swap(state, Ordering::AcqRel);
        if state && !previous {
            self.events.signal(EVENT_SET, 1);
        }
    }

    pub fn get(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }
}

impl KernelObject for Condition {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::Condition
    }

    fn attach_event(&self, reg: &Arc<EventRegistration>) -> KResult<()> {
        if reg.event_id != EVENT_SET {
            return Err(crate::Status::InvalidEvent);
        }
        self.events.attach(reg.clone());
        // Nível: condição já verdadeira sinaliza sem esperar transição
        if !reg.wants_edge() && self.get() {
            reg.signal(1);
            if reg.oneshot() {
                self.events.detach(reg);
            }
        }
        Ok(())
    }

    fn detach_event(&self, reg: &Arc<EventRegistration>) {
        self.events.detach(reg);
    }

    fn on_close(&self) {
        self.events.error_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_transitions_only() {
        let cond = Condition::new();
        assert!(!cond.get());
        cond.set(true);
        assert!(cond.get());
        cond.set(false);
        assert!(!cond.get());
    }

    #[test]
    fn repeated_set_is_idempotent() {
        let cond = Condition::new();
        cond.set(true);
        cond.set(true);
        assert!(cond.get());
    }
}
