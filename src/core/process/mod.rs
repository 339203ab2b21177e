//! Processos
//!
//! Um processo agrupa espaço de endereçamento, tabela de handles, token e
//! threads. O registro sobrevive à morte: só some quando a última
//! referência cai, então waiters tardios ainda leem status e motivo de
//! saída. O processo do kernel não tem `MmuContext` próprio, roda sempre
//! no contexto de kernel.

pub mod token;

pub use token::{Capabilities, Token};

use crate::core::object::{
    EventList, EventRegistration, HandleFlags, HandleTable, KernelObject, ObjectType,
};
use crate::core::thread::exceptions::{ExceptionCode, ExceptionHandler, EXCEPTION_COUNT};
use crate::core::thread::{PriorityClass, Tid};
use crate::klib::AvlTree;
use crate::mm::mmu::MmuContext;
use crate::sync::{Notifier, Spinlock};
use crate::{kdebug, kerror, KResult, Status};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Id de processo
pub type Pid = u64;

/// O processo do kernel, criado no boot
pub const KERNEL_PID: Pid = 1;

/// Limite de processos vivos
pub const MAX_PROCESSES: usize = 1024;

/// Evento "processo morreu"; data = status de saída
pub const EVENT_DEATH: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Alive,
    Dead,
}

/// Por que o processo saiu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Normal,
    Killed,
    Exception(ExceptionCode),
}

/// Contexto de I/O herdado pelos filhos
pub struct IoContext {
    pub cwd: Option<Arc<crate::fs::node::Node>>,
    pub root: Option<Arc<crate::fs::node::Node>>,
}

impl IoContext {
    fn empty() -> Self {
        Self {
            cwd: None,
            root: None,
        }
    }

    fn inherit(&self) -> Self {
        Self {
            cwd: self.cwd.clone(),
            root: self.root.clone(),
        }
    }
}

/// Estado mutável protegido
pub struct ProcessInner {
    pub state: ProcessState,
    pub class: PriorityClass,
    pub token: Arc<Token>,
    pub threads: Vec<Tid>,
    /// Threads ainda executando; a última a sair desmonta o processo
    pub running: usize,
    pub exit_status: i32,
    pub exit_reason: ExitReason,
    pub io: IoContext,
    /// Fallback dos handlers por thread
    pub exception_handlers: [Option<ExceptionHandler>; EXCEPTION_COUNT],
}

/// Um processo
pub struct Process {
    pub id: Pid,
    pub name: String,
    /// None = processo do kernel (usa o contexto de kernel)
    pub mmu: Option<Arc<MmuContext>>,
    pub handles: HandleTable,
    /// Morte deste processo derruba o sistema
    pub critical: AtomicBool,
    /// Notificações in-kernel de morte; caller_data = pid
    pub death: Notifier,
    events: EventList,
    pub inner: Spinlock<ProcessInner>,
}

static NEXT_PID: AtomicU64 = AtomicU64::new(KERNEL_PID);
static PROCESSES: Spinlock<AvlTree<Arc<Process>>> =
    Spinlock::new("process_table", AvlTree::new());

impl Process {
    pub fn token(&self) -> Arc<Token> {
        self.inner.lock().token.clone()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    /// (status, motivo) depois da morte.
    pub fn exit_info(&self) -> Option<(i32, ExitReason)> {
        let inner = self.inner.lock();
        match inner.state {
            ProcessState::Dead => Some((inner.exit_status, inner.exit_reason)),
            ProcessState::Alive => None,
        }
    }
}

impl KernelObject for Process {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::Process
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn attach_event(&self, reg: &Arc<EventRegistration>) -> KResult<()> {
        if reg.event_id != EVENT_DEATH {
            return Err(Status::InvalidEvent);
        }
        self.events.attach(reg.clone());
        // Nível: processo já morto sinaliza na hora
        if !reg.wants_edge() {
            if let Some((status, _)) = self.exit_info() {
                reg.signal(status as u64);
                if reg.oneshot() {
                    self.events.detach(reg);
                }
            }
        }
        Ok(())
    }

    fn detach_event(&self, reg: &Arc<EventRegistration>) {
        self.events.detach(reg);
    }
}

/// Cria o processo do kernel. Chamado uma vez no boot, antes do scheduler.
pub fn init() {
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    debug_assert_eq!(pid, KERNEL_PID);
    let kernel = Arc::new(Process {
        id: pid,
        name: String::from("kernel"),
        mmu: None,
        handles: HandleTable::new(),
        critical: AtomicBool::new(true),
        death: Notifier::new("kernel_death"),
        events: EventList::new(),
        inner: Spinlock::new("process", ProcessInner {
            state: ProcessState::Alive,
            class: PriorityClass::Normal,
            token: Token::kernel(),
            threads: Vec::new(),
            running: 0,
            exit_status: 0,
            exit_reason: ExitReason::Normal,
            io: IoContext::empty(),
            exception_handlers: [None; EXCEPTION_COUNT],
        }),
    });
    PROCESSES.lock().insert(pid, kernel);
    crate::kinfo!("process: kernel pid=", pid);
}

/// Cria um processo de usuário com espaço de endereçamento próprio.
///
/// O token e o contexto de I/O vêm do processo corrente, salvo token
/// explícito.
pub fn create(
    name: &str,
    class: PriorityClass,
    token: Option<Arc<Token>>,
) -> KResult<Arc<Process>> {
    let parent = current();
    let token = match token {
        Some(token) => token,
        // O filho herda o token efetivo do criador, inclusive um assumido
        // pela thread
        None => crate::core::thread::effective_token(),
    };
    let io = parent
        .as_ref()
        .map(|parent| parent.inner.lock().io.inherit())
        .unwrap_or_else(IoContext::empty);

    if PROCESSES.lock().len() >= MAX_PROCESSES {
        return Err(Status::ProcessLimit);
    }

    let mmu = Arc::new(MmuContext::new_user()?);
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    let process = Arc::new(Process {
        id: pid,
        name: String::from(name),
        mmu: Some(mmu),
        handles: HandleTable::new(),
        critical: AtomicBool::new(false),
        death: Notifier::new("process_death"),
        events: EventList::new(),
        inner: Spinlock::new("process", ProcessInner {
            state: ProcessState::Alive,
            class,
            token,
            threads: Vec::new(),
            running: 0,
            exit_status: 0,
            exit_reason: ExitReason::Normal,
            io,
            exception_handlers: [None; EXCEPTION_COUNT],
        }),
    });
    PROCESSES.lock().insert(pid, process.clone());
    kdebug!("process criado, pid=", pid);
    Ok(process)
}

/// Instala um objeto na tabela do filho durante o process_create.
///
/// Tipos não transferíveis são rejeitados aqui, na instalação.
pub fn install_handle(
    child: &Arc<Process>,
    handle: u32,
    object: Arc<dyn KernelObject>,
    flags: HandleFlags,
) -> KResult<()> {
    if !object.otype().transferable() {
        return Err(Status::PermDenied);
    }
    child.handles.insert_at(handle, object, flags)
}

/// Copia os handles INHERITABLE do pai para o filho, nos mesmos índices.
pub fn inherit_handles(parent: &Arc<Process>, child: &Arc<Process>) -> KResult<()> {
    for (handle, entry) in parent.handles.inheritable_entries() {
        // Não transferíveis nunca carregam INHERITABLE, mas a regra vale
        // também aqui
        if !entry.object.otype().transferable() {
            continue;
        }
        child.handles.insert_at(handle, entry.object, entry.flags)?;
    }
    Ok(())
}

/// Busca por pid.
pub fn lookup(pid: Pid) -> Option<Arc<Process>> {
    PROCESSES.lock().lookup(pid).cloned()
}

/// Processo da thread corrente.
pub fn current() -> Option<Arc<Process>> {
    let thread = crate::core::thread::current()?;
    lookup(thread.owner)
}

/// O pid é o do processo do kernel?
pub fn is_kernel_process(pid: Pid) -> bool {
    pid == KERNEL_PID
}

/// Registra uma thread nova no processo dono.
pub fn attach_thread(pid: Pid, tid: Tid) -> KResult<()> {
    let process = lookup(pid).ok_or(Status::NotFound)?;
    let mut inner = process.inner.lock();
    if inner.state != ProcessState::Alive {
        return Err(Status::NotFound);
    }
    inner.threads.push(tid);
    inner.running += 1;
    Ok(())
}

/// Desconta uma thread que saiu. A última desmonta o processo.
pub fn detach_thread(pid: Pid, tid: Tid, status: i32) {
    let process = match lookup(pid) {
        Some(process) => process,
        None => return,
    };
    let last = {
        let mut inner = process.inner.lock();
        inner.threads.retain(|thread| *thread != tid);
        debug_assert!(inner.running > 0);
        inner.running -= 1;
        if inner.running == 0 && inner.state == ProcessState::Alive {
            inner.state = ProcessState::Dead;
            inner.exit_status = status;
            true
        } else {
            false
        }
    };
    if last {
        teardown(&process);
    }
}

/// Desmonta os recursos de um processo morto e avisa os interessados.
fn teardown(process: &Arc<Process>) {
    if process.critical.load(Ordering::Acquire) {
        kerror!("processo critico morreu, pid=", process.id);
        crate::core::panic_hard("morte de processo critico");
    }
    if let Some(mmu) = process.mmu.as_ref() {
        mmu.teardown_user();
    }
    process.handles.clear();
    {
        let mut inner = process.inner.lock();
        inner.io.cwd = None;
        inner.io.root = None;
    }
    // Mesma convenção do evento de morte de thread: status com sinal
    // estendido para quem lê o data como i64
    let status = process.inner.lock().exit_status;
    process.events.signal(EVENT_DEATH, status as u64);
    process.death.run_and_drain(process.id as usize);
    PROCESSES.lock().remove(process.id);
    kdebug!("process encerrado, pid=", process.id);
}

/// Mata um processo: marca todas as threads e deixa cada uma morrer no
/// próximo ponto de suspensão.
pub fn kill(pid: Pid) -> KResult<()> {
    let process = lookup(pid).ok_or(Status::NotFound)?;
    let threads = {
        let mut inner = process.inner.lock();
        if inner.state != ProcessState::Alive {
            return Err(Status::NotFound);
        }
        inner.exit_reason = ExitReason::Killed;
        inner.threads.clone()
    };
    for tid in threads {
        let _ = crate::core::thread::kill(tid);
    }
    Ok(())
}

/// Exceção fatal no processo corrente: registra o motivo, derruba as
/// outras threads e morre aqui.
pub fn fault_current(code: ExceptionCode, detail: u64) -> ! {
    kerror!("processo abatido por excecao, detalhe=", detail);
    let thread = match crate::core::thread::current() {
        Some(thread) => thread,
        None => crate::core::panic_hard("fault sem thread corrente"),
    };
    if let Some(process) = lookup(thread.owner) {
        let others = {
            let mut inner = process.inner.lock();
            inner.exit_reason = ExitReason::Exception(code);
            inner.threads.clone()
        };
        for tid in others {
            if tid != thread.id {
                let _ = crate::core::thread::kill(tid);
            }
        }
    }
    crate::core::thread::exit(-1);
}

/// Handler de exceção de fallback do processo.
pub fn exception_handler(pid: Pid, code: ExceptionCode) -> Option<ExceptionHandler> {
    let process = lookup(pid)?;
    let inner = process.inner.lock();
    inner.exception_handlers[code as usize]
}

/// Instala o fallback por processo.
pub fn set_exception_handler(
    pid: Pid,
    code: ExceptionCode,
    handler: Option<ExceptionHandler>,
) -> KResult<()> {
    if let Some(handler) = handler {
        if handler.ipl > crate::core::thread::IPL_MAX {
            return Err(Status::InvalidArg);
        }
    }
    let process = lookup(pid).ok_or(Status::NotFound)?;
    process.inner.lock().exception_handlers[code as usize] = handler;
    Ok(())
}

/// Troca o token de um processo. Exige SET_TOKEN do chamador.
pub fn set_token(pid: Pid, token: Arc<Token>) -> KResult<()> {
    if current().is_some() {
        crate::core::thread::effective_token().require(Capabilities::SET_TOKEN)?;
    }
    let process = lookup(pid).ok_or(Status::NotFound)?;
    process.inner.lock().token = token;
    Ok(())
}

/// Ativa o espaço de endereçamento do processo de destino. Chamado pelo
/// scheduler durante o switch, com interrupções desabilitadas.
pub fn switch_address_space(pid: Pid) {
    let target = PROCESSES
        .lock_noirq()
        .lookup(pid)
        .and_then(|process| process.mmu.clone());
    match target {
        Some(mmu) => mmu.switch(None),
        None => crate::mm::mmu::kernel_context().switch(None),
    }
}

/// Processos vivos (diagnóstico).
pub fn count() -> usize {
    PROCESSES.lock().len()
}
