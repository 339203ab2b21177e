//! Objetos do kernel e espera por eventos
//!
//! Todo recurso visível a usuário é um `Arc<dyn KernelObject>` atrás de um
//! handle. A espera liga um `EventRegistration` à lista de eventos do
//! objeto; em modo nível uma condição já verdadeira sinaliza na hora da
//! ligação, em modo borda só transições contam.

pub mod handle;

pub use handle::{
    DuplicateMode, HandleEntry, HandleFlags, HandleTable, INVALID_HANDLE, MAX_HANDLES,
};

use crate::core::thread::{ThreadInterrupt, Tid};
use crate::sync::{Semaphore, Spinlock};
use crate::{KResult, Status};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Tipos de objeto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectType {
    Process = 1,
    Thread = 2,
    Token = 3,
    Timer = 4,
    Watcher = 5,
    Area = 6,
    File = 7,
    Port = 8,
    Connection = 9,
    Semaphore = 10,
    ProcessGroup = 11,
    Condition = 12,
}

impl ObjectType {
    /// Handles deste tipo podem ser instalados em outro processo?
    ///
    /// Watchers e conditions são amarrados à thread/processo que os criou.
    pub fn transferable(self) -> bool {
        !matches!(self, ObjectType::Watcher | ObjectType::Condition)
    }
}

bitflags! {
    /// Flags de um evento, entrada e saída
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        /// Saída: o evento ocorreu
        const SIGNALLED = 1 << 0;
        /// Saída: falha ao armar este evento
        const ERROR = 1 << 1;
        /// Entrada: só transições contam (modo borda)
        const EDGE = 1 << 2;
        /// Entrada: desarma após o primeiro disparo
        const ONESHOT = 1 << 3;
    }
}

bitflags! {
    /// Flags do wait como um todo
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// Satisfeito só quando todos os eventos dispararem
        const WAIT_ALL = 1 << 0;
    }
}

/// Um evento pedido pelo chamador do wait
#[derive(Debug, Clone, Copy)]
pub struct ObjectEvent {
    pub handle: u32,
    pub event: u32,
    /// Dado de saída do evento (ex.: status de exit)
    pub data: u64,
    pub flags: EventFlags,
}

/// Interface comum de todos os objetos do kernel
pub trait KernelObject: Send + Sync {
    fn otype(&self) -> ObjectType;

    fn name(&self) -> &str {
        ""
    }

    /// Último handle fechado.
    fn on_close(&self) {}

    /// Liga um registro de evento ao objeto. Modo nível: condição já
    /// verdadeira deve sinalizar antes de retornar.
    fn attach_event(&self, _reg: &Arc<EventRegistration>) -> KResult<()> {
        Err(Status::NotSupported)
    }

    fn detach_event(&self, _reg: &Arc<EventRegistration>) {}

    /// Volta ao tipo concreto na borda de syscalls; toda implementação
    /// devolve `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync>;
}

/// Sincronização de um object_wait em andamento
pub struct WaitContext {
    sem: Semaphore,
    remaining: AtomicUsize,
}

impl WaitContext {
    fn new(needed: usize) -> Arc<Self> {
        Arc::new(Self {
            sem: Semaphore::new(0),
            remaining: AtomicUsize::new(needed),
        })
    }

    fn satisfy(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.sem.up(1);
        }
    }
}

/// Estado de um callback registrado
const CB_IDLE: u32 = 0;
const CB_PENDING: u32 = 1;
const CB_REMOVING: u32 = 2;

pub struct CallbackState {
    tid: Tid,
    ipl: u8,
    func: fn(usize),
    data: usize,
    state: AtomicU32,
}

impl CallbackState {
    fn deliver(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(CB_IDLE, CB_PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Já pendente ou em remoção
            return;
        }
        if let Some(thread) = crate::core::thread::lookup(self.tid) {
            let raw = Arc::into_raw(self.clone()) as usize;
            crate::core::thread::queue_interrupt(&thread, ThreadInterrupt {
                ipl: self.ipl,
                func: callback_tramp,
                data: raw,
            });
        } else {
            self.state.store(CB_REMOVING, Ordering::Release);
        }
    }
}

fn callback_tramp(data: usize) {
    // SAFETY: criado por deliver() via Arc::into_raw, consumido uma vez
    let callback = unsafe { Arc::from_raw(data as *const CallbackState) };
    if callback
        .state
        .compare_exchange(CB_PENDING, CB_IDLE, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        (callback.func)(callback.data);
    }
    // Em CB_REMOVING o cancelamento venceu; só soltar a referência
}

enum EventTarget {
    Waiter(Arc<WaitContext>),
    Callback(Arc<CallbackState>),
}

/// Um evento ligado a um objeto
pub struct EventRegistration {
    pub event_id: u32,
    flags: AtomicU32,
    data: AtomicU64,
    target: EventTarget,
    slot: usize,
}

impl EventRegistration {
    pub fn wants_edge(&self) -> bool {
        self.flags.load(Ordering::Acquire) & EventFlags::EDGE.bits() != 0
    }

    pub fn oneshot(&self) -> bool {
        self.flags.load(Ordering::Acquire) & EventFlags::ONESHOT.bits() != 0
    }

    fn out_flags(&self) -> EventFlags {
        EventFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// O evento ocorreu.
    pub fn signal(&self, data: u64) {
        self.data.store(data, Ordering::Release);
        self.flags
            .fetch_or(EventFlags::SIGNALLED.bits(), Ordering::AcqRel);
        match &self.target {
            EventTarget::Waiter(ctx) => ctx.satisfy(),
            EventTarget::Callback(cb) => cb.deliver(),
        }
    }

    /// Falha ao armar ou objeto destruído sob o waiter.
    pub fn error(&self) {
        self.flags
            .fetch_or(EventFlags::ERROR.bits(), Ordering::AcqRel);
        if let EventTarget::Waiter(ctx) = &self.target {
            ctx.satisfy();
        }
    }
}

/// Lista de registros de evento pendurados num objeto
pub struct EventList {
    regs: Spinlock<Vec<Arc<EventRegistration>>>,
}

impl EventList {
    pub const fn new() -> Self {
        Self {
            regs: Spinlock::new("event_list", Vec::new()),
        }
    }

    pub fn attach(&self, reg: Arc<EventRegistration>) {
        self.regs.lock().push(reg);
    }

    pub fn detach(&self, reg: &Arc<EventRegistration>) {
        self.regs
            .lock()
            .retain(|candidate| !Arc::ptr_eq(candidate, reg));
    }

    /// Dispara os registros do evento dado; oneshots saem da lista.
    pub fn signal(&self, event_id: u32, data: u64) {
        let fired: Vec<Arc<EventRegistration>> = {
            let regs = self.regs.lock();
            regs.iter()
                .filter(|reg| reg.event_id == event_id)
                .cloned()
                .collect()
        };
        for reg in &fired {
            reg.signal(data);
        }
        self.regs
            .lock()
            .retain(|reg| !(reg.event_id == event_id && reg.oneshot()));
    }

    /// Objeto morrendo: todos os registros viram erro.
    pub fn error_all(&self) {
        let regs: Vec<Arc<EventRegistration>> = {
            let mut inner = self.regs.lock();
            core::mem::take(&mut *inner)
        };
        for reg in regs {
            reg.error();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regs.lock().is_empty()
    }
}

/// Espera por um conjunto de eventos de objetos.
///
/// Com `WAIT_ALL` o retorno só é `Ok` quando todos dispararem; sem, o
/// primeiro basta. `timeout_ns` 0 é poll: retorna `WouldBlock` se nada
/// estava sinalizado. Flags `SIGNALLED`/`ERROR` de cada evento ficam nos
/// próprios entries, mesmo em timeout parcial.
pub fn object_wait(
    events: &mut [ObjectEvent],
    flags: WaitFlags,
    timeout_ns: i64,
) -> KResult<()> {
    if events.is_empty() {
        return Err(Status::InvalidArg);
    }
    let process = crate::core::process::current().ok_or(Status::NotSupported)?;

    let needed = if flags.contains(WaitFlags::WAIT_ALL) {
        events.len()
    } else {
        1
    };
    let ctx = WaitContext::new(needed);

    let mut attached: Vec<(Arc<dyn KernelObject>, Arc<EventRegistration>)> = Vec::new();
    let mut attach_error = None;
    for (slot, event) in events.iter().enumerate() {
        let object = match process.handles.lookup_object(event.handle) {
            Ok(object) => object,
            Err(status) => {
                attach_error = Some((slot, status));
                break;
            }
        };
        let reg = Arc::new(EventRegistration {
            event_id: event.event,
            flags: AtomicU32::new(
                (event.flags & (EventFlags::EDGE | EventFlags::ONESHOT)).bits(),
            ),
            data: AtomicU64::new(0),
            target: EventTarget::Waiter(ctx.clone()),
            slot,
        });
        match object.attach_event(&reg) {
            Ok(()) => attached.push((object, reg)),
            Err(status) => {
                attach_error = Some((slot, status));
                break;
            }
        }
    }

    // O entry que falhou ao armar fica marcado para o chamador saber qual foi
    if let Some((slot, _)) = attach_error {
        let event = &mut events[slot];
        event.flags =
            (event.flags & (EventFlags::EDGE | EventFlags::ONESHOT)) | EventFlags::ERROR;
    }

    let result = match attach_error {
        Some((_, status)) => Err(status),
        None => match ctx.sem.down(timeout_ns) {
            Err(Status::WouldBlock) if timeout_ns == 0 => Err(Status::WouldBlock),
            other => other,
        },
    };

    for (object, reg) in &attached {
        object.detach_event(reg);
    }

    // Resultado de cada evento de volta para o chamador
    for (_, reg) in &attached {
        let event = &mut events[reg.slot];
        let out = reg.out_flags() & (EventFlags::SIGNALLED | EventFlags::ERROR);
        event.flags = (event.flags & (EventFlags::EDGE | EventFlags::ONESHOT)) | out;
        if out.contains(EventFlags::SIGNALLED) {
            event.data = reg.data.load(Ordering::Acquire);
        }
    }

    result
}

/// Registro de callback devolvido por `object_callback`
pub struct CallbackRegistration {
    object: Arc<dyn KernelObject>,
    reg: Arc<EventRegistration>,
    state: Arc<CallbackState>,
}

impl CallbackRegistration {
    /// Cancela o callback. Seguro mesmo com uma entrega em voo: o estado
    /// `REMOVING` faz o trampolim descartá-la.
    pub fn cancel(self) {
        self.state.state.store(CB_REMOVING, Ordering::Release);
        self.object.detach_event(&self.reg);
    }
}

/// Registra um callback disparado em modo borda quando o evento ocorrer,
/// entregue como interrupção de thread no IPL dado.
pub fn object_callback(
    handle: u32,
    event_id: u32,
    ipl: u8,
    func: fn(usize),
    data: usize,
) -> KResult<CallbackRegistration> {
    if ipl > crate::core::thread::IPL_MAX {
        return Err(Status::InvalidArg);
    }
    let process = crate::core::process::current().ok_or(Status::NotSupported)?;
    let thread = crate::core::thread::current().ok_or(Status::NotSupported)?;
    let object = process.handles.lookup_object(handle)?;

    let state = Arc::new(CallbackState {
        tid: thread.id,
        ipl,
        func,
        data,
        state: AtomicU32::new(CB_IDLE),
    });
    let reg = Arc::new(EventRegistration {
        event_id,
        // Callbacks são sempre borda
        flags: AtomicU32::new(EventFlags::EDGE.bits()),
        data: AtomicU64::new(0),
        target: EventTarget::Callback(state.clone()),
        slot: 0,
    });
    object.attach_event(&reg)?;
    Ok(CallbackRegistration { object, reg, state })
}
