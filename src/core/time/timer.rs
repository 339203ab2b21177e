//! Timers por CPU
//!
//! Cada CPU mantém sua lista ordenada por deadline. Um timer é armado na
//! CPU corrente; o id carrega a CPU dona, então o cancel funciona de
//! qualquer lugar. Expiração roda no tick e os callbacks saem em contexto
//! de DPC, nunca dentro do IRQ handler.

use crate::core::object::{EventList, EventRegistration, KernelObject, ObjectType};
use crate::core::smp::MAX_CPUS;
use crate::core::thread::Tid;
use crate::klib::avl::AvlTree;
use crate::sync::Spinlock;
use crate::KResult;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Identificador de um timer armado. CPU dona nos bits altos.
pub type TimerId = u64;

const CPU_SHIFT: u32 = 48;
const SEQ_MASK: u64 = (1 << CPU_SHIFT) - 1;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

fn make_id(cpu: u32) -> TimerId {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed) & SEQ_MASK;
    ((cpu as u64) << CPU_SHIFT) | seq
}

fn cpu_of(id: TimerId) -> usize {
    (id >> CPU_SHIFT) as usize
}

#[derive(Clone, Copy)]
enum TimerKind {
    /// Acorda a thread com TimedOut
    Wake(Tid),
    /// Enfileira (func, data) como DPC
    Call(fn(usize), usize),
}

struct TimerEntry {
    id: TimerId,
    deadline_ns: u64,
    /// 0 = one-shot
    period_ns: u64,
    kind: TimerKind,
}

struct TimerList {
    /// Ordenada por deadline crescente
    entries: Vec<TimerEntry>,
}

impl TimerList {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn insert(&mut self, entry: TimerEntry) {
        let position = self
            .entries
            .iter()
            .position(|other| other.deadline_ns > entry.deadline_ns)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }

    fn remove(&mut self, id: TimerId) -> bool {
        if let Some(position) = self.entries.iter().position(|entry| entry.id == id) {
            self.entries.remove(position);
            true
        } else {
            false
        }
    }
}

const LIST_INIT: Spinlock<TimerList> = Spinlock::new("timer_list", TimerList::new());
static LISTS: [Spinlock<TimerList>; MAX_CPUS] = [LIST_INIT; MAX_CPUS];

fn arm(kind: TimerKind, ns: u64, period_ns: u64) -> TimerId {
    let cpu = crate::core::smp::current().id;
    let id = make_id(cpu);
    let entry = TimerEntry {
        id,
        deadline_ns: crate::core::time::now_ns().saturating_add(ns),
        period_ns,
        kind,
    };
    LISTS[cpu as usize].lock().insert(entry);
    id
}

/// Arma um one-shot que acorda `tid` com `TimedOut` após `ns`.
pub fn arm_wake(tid: Tid, ns: u64) -> TimerId {
    arm(TimerKind::Wake(tid), ns, 0)
}

/// Arma um timer de callback; `period_ns` 0 = one-shot.
pub fn arm_call(ns: u64, period_ns: u64, func: fn(usize), data: usize) -> TimerId {
    arm(TimerKind::Call(func, data), ns, period_ns)
}

/// Cancela um timer armado, mesmo de outra CPU. False se já expirou.
pub fn cancel(id: TimerId) -> bool {
    let cpu = cpu_of(id);
    if cpu >= MAX_CPUS {
        return false;
    }
    LISTS[cpu].lock().remove(id)
}

fn wake_dpc(data: usize) {
    crate::core::sched::wake_tid(data as Tid, Err(crate::Status::TimedOut));
}

/// Expira os timers vencidos da CPU corrente. Chamado pelo tick IRQ; os
/// disparos viram DPCs.
pub fn tick() {
    let cpu = crate::core::smp::current().id as usize;
    let now = crate::core::time::now_ns();
    let mut fired: Vec<TimerKind> = Vec::new();
    {
        let mut list = LISTS[cpu].lock();
        while let Some(front) = list.entries.first() {
            if front.deadline_ns > now {
                break;
            }
            let mut entry = list.entries.remove(0);
            fired.push(entry.kind);
            if entry.period_ns > 0 {
                entry.deadline_ns = now.saturating_add(entry.period_ns);
                list.insert(entry);
            }
        }
    }
    for kind in fired {
        match kind {
            TimerKind::Wake(tid) => crate::core::work::queue(wake_dpc, tid as usize),
            TimerKind::Call(func, data) => crate::core::work::queue(func, data),
        }
    }
}

/// Timers pendentes na CPU corrente (diagnóstico).
pub fn pending_on_cpu() -> usize {
    let cpu = crate::core::smp::current().id as usize;
    LISTS[cpu].lock().entries.len()
}

// === Objeto timer ===

/// Evento "timer disparou"
pub const EVENT_FIRED: u32 = 0;

/// Registro global id → objeto, para o DPC achar o dono sem ponteiro cru
static OBJECTS: Spinlock<AvlTree<Weak<TimerObject>>> =
    Spinlock::new("timer_objects", AvlTree::new());

/// Timer exposto pela camada de handles
pub struct TimerObject {
    /// (id armado, período; 0 = one-shot)
    armed: Spinlock<Option<(TimerId, u64)>>,
    fired: AtomicBool,
    events: EventList,
}

impl TimerObject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: Spinlock::new("timer_object", None),
            fired: AtomicBool::new(false),
            events: EventList::new(),
        })
    }

    /// Arma (ou rearma) o timer. `period_ns` 0 = one-shot.
    pub fn set(self: &Arc<Self>, ns: u64, period_ns: u64) {
        self.disarm();
        self.fired.store(false, Ordering::Release);
        let cpu = crate::core::smp::current().id;
        let id = make_id(cpu);
        OBJECTS.lock().insert(id, Arc::downgrade(self));
        // O data do DPC é o próprio id: o disparo resolve o dono pelo
        // registro, nunca por ponteiro cru
        LISTS[cpu as usize].lock().insert(TimerEntry {
            id,
            deadline_ns: crate::core::time::now_ns().saturating_add(ns),
            period_ns,
            kind: TimerKind::Call(Self::fire_dpc, id as usize),
        });
        *self.armed.lock() = Some((id, period_ns));
    }

    /// Desarma. Sem efeito se não estava armado.
    pub fn disarm(&self) {
        if let Some((id, _)) = self.armed.lock().take() {
            cancel(id);
            OBJECTS.lock().remove(id);
        }
    }

    fn fire_dpc(data: usize) {
        let id = data as TimerId;
        let object = {
            let mut registry = OBJECTS.lock();
            match registry.lookup(id) {
                Some(weak) => {
                    let object = weak.upgrade();
                    if object.is_none() {
                        registry.remove(id);
                    }
                    object
                }
                None => None,
            }
        };
        let Some(object) = object else {
            return;
        };
        object.fired.store(true, Ordering::Release);
        object.events.signal(EVENT_FIRED, crate::core::time::now_ns());
        let expired = {
            let mut armed = object.armed.lock();
            match *armed {
                // One-shot consumido: o tick já o tirou da lista
                Some((armed_id, 0)) if armed_id == id => {
                    *armed = None;
                    true
                }
                _ => false,
            }
        };
        if expired {
            OBJECTS.lock().remove(id);
        }
    }
}

impl KernelObject for TimerObject {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::Timer
    }

    fn attach_event(&self, reg: &Arc<EventRegistration>) -> KResult<()> {
        if reg.event_id != EVENT_FIRED {
            return Err(crate::Status::InvalidEvent);
        }
        self.events.attach(reg.clone());
        if !reg.wants_edge() && self.fired.load(Ordering::Acquire) {
            reg.signal(crate::core::time::now_ns());
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
        self.disarm();
        self.events.error_all();
    }
}
