//! Threads de kernel e de usuário
//!
//! Uma thread é um `Arc<Thread>`: o id-table, as run queues e os wait
//! queues compartilham a mesma instância. Estado mutável fica atrás do
//! spinlock interno; campos quentes (kill, IPL, CPU) são atômicos.

pub mod exceptions;

use crate::arch::context::CpuContext;
use crate::arch::traits::cpu::CpuOps;
use crate::arch::Cpu;
use crate::core::object::{EventList, EventRegistration, KernelObject, ObjectType};
use crate::core::process::Token;
use crate::klib::AvlTree;
use crate::mm::physmap::{phys_to_virt, virt_to_phys};
use crate::mm::pmm::{self, AllocFlags};
use crate::mm::{VirtAddr, PAGE_SIZE};
use crate::sync::Spinlock;
use crate::{KResult, Status};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Id de thread
pub type Tid = u64;

/// Páginas da pilha de kernel; a primeira é guarda lógica
pub const STACK_PAGES: usize = 4;
/// Nível máximo de IPL; 15 bloqueia tudo
pub const IPL_MAX: u8 = 15;
/// Evento "thread morreu"; data = status de saída
pub const EVENT_DEATH: u32 = 0;
/// Ticks de timeslice por classe não importam aqui; ver sched

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Created,
    Ready,
    Running,
    Sleeping,
    Dead,
}

/// Classe de prioridade do scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum PriorityClass {
    Low = 0,
    Normal = 1,
    High = 2,
}

/// Modo de ajuste de IPL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IplMode {
    /// Só sobe; pedido menor ou igual ao atual é no-op
    Raise,
    /// Define incondicionalmente
    Always,
}

/// Uma interrupção de thread pendente
pub struct ThreadInterrupt {
    /// Entregável quando `ipl > IPL corrente` da thread
    pub ipl: u8,
    pub func: fn(usize),
    pub data: usize,
}

/// Estado mutável protegido
pub struct ThreadInner {
    pub state: ThreadState,
    pub class: PriorityClass,
    pub timeslice: u32,
    /// Resultado do último park: por que acordou
    pub wait_status: KResult<()>,
    /// O park atual aceita interrupção por kill?
    pub interruptible: bool,
    /// Wake que chegou com a thread ainda fora de `Sleeping`; o próximo
    /// park o consome em vez de dormir
    pub pending_wake: Option<KResult<()>>,
    pub pending_interrupts: Vec<ThreadInterrupt>,
    pub exception_handlers: [Option<exceptions::ExceptionHandler>; exceptions::EXCEPTION_COUNT],
    pub tls: u64,
    pub exit_status: i32,
    /// Token assumido no lugar do token do processo dono
    pub token: Option<Arc<Token>>,
}

/// Uma thread do kernel ou de um processo
pub struct Thread {
    pub id: Tid,
    pub name: String,
    /// Processo dono
    pub owner: u64,
    /// CPU em que roda ou rodou por último
    pub cpu: AtomicU32,
    pub kill_flag: AtomicBool,
    pub ipl: AtomicU8,
    stack_base: u64,
    events: EventList,
    pub inner: Spinlock<ThreadInner>,
    /// Acessado apenas pelo scheduler durante o switch
    pub context: UnsafeCell<CpuContext>,
}

// SAFETY: context só é tocado pelo scheduler com a thread fora de execução;
// o resto é atômico ou protegido pelo spinlock interno
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    /// Topo da pilha de kernel.
    pub fn stack_top(&self) -> u64 {
        self.stack_base + (STACK_PAGES * PAGE_SIZE) as u64
    }

    /// A página de guarda lógica no fundo da pilha.
    pub fn stack_guard(&self) -> core::ops::Range<u64> {
        self.stack_base..self.stack_base + PAGE_SIZE as u64
    }

    /// Uma interrupção pendente é entregável no IPL atual?
    fn next_deliverable(&self) -> Option<ThreadInterrupt> {
        let ipl = self.ipl.load(Ordering::Acquire);
        let mut inner = self.inner.lock();
        let position = inner
            .pending_interrupts
            .iter()
            .position(|intr| intr.ipl > ipl)?;
        Some(inner.pending_interrupts.remove(position))
    }

    /// Drena as interrupções de thread admissíveis no IPL corrente.
    pub fn drain_interrupts(&self) {
        while let Some(intr) = self.next_deliverable() {
            (intr.func)(intr.data);
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if let Some(phys) = virt_to_phys(VirtAddr::new(self.stack_base)) {
            pmm::free(phys, STACK_PAGES);
        }
    }
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);
static THREADS: Spinlock<AvlTree<Arc<Thread>>> = Spinlock::new("thread_table", AvlTree::new());

struct ThreadStart {
    func: fn(usize),
    arg: usize,
}

#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    r#"
.global kthread_tramp
kthread_tramp:
    mov rdi, r12
    call kthread_entry
"#
);

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    r#"
.global kthread_tramp
kthread_tramp:
    mov x0, x19
    bl kthread_entry
"#
);

extern "C" {
    fn kthread_tramp();
}

/// Primeira função Rust de toda thread nova.
#[no_mangle]
extern "C" fn kthread_entry(start: usize) -> ! {
    // O switch entrega com interrupções desabilitadas
    Cpu::enable_interrupts();
    // SAFETY: ponteiro criado por create() via Box::into_raw, consumido uma vez
    let start = unsafe { Box::from_raw(start as *mut ThreadStart) };
    (start.func)(start.arg);
    exit(0);
}

/// Cria uma thread (estado `Created`). `start` a coloca na run queue.
pub fn create(
    name: &str,
    owner: u64,
    class: PriorityClass,
    func: fn(usize),
    arg: usize,
) -> KResult<Arc<Thread>> {
    let stack = pmm::alloc(STACK_PAGES, AllocFlags::ZERO | AllocFlags::CAN_SLEEP)
        .ok_or(Status::NoMemory)?;
    let stack_base = phys_to_virt(stack).as_u64();
    let stack_top = stack_base + (STACK_PAGES * PAGE_SIZE) as u64;

    let start = Box::into_raw(Box::new(ThreadStart { func, arg })) as usize;
    let mut context = CpuContext::new();
    context.setup(kthread_tramp as usize as u64, stack_top, start as u64);

    let id = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    let thread = Arc::new(Thread {
        id,
        name: String::from(name),
        owner,
        cpu: AtomicU32::new(Cpu::current_id()),
        kill_flag: AtomicBool::new(false),
        ipl: AtomicU8::new(0),
        stack_base,
        events: EventList::new(),
        inner: Spinlock::new("thread", ThreadInner {
            state: ThreadState::Created,
            class,
            timeslice: 0,
            wait_status: Ok(()),
            interruptible: false,
            pending_wake: None,
            pending_interrupts: Vec::new(),
            exception_handlers: [None; exceptions::EXCEPTION_COUNT],
            tls: 0,
            exit_status: 0,
            token: None,
        }),
        context: UnsafeCell::new(context),
    });

    THREADS.lock().insert(id, thread.clone());
    crate::core::process::attach_thread(owner, id)?;
    crate::kdebug!("thread criada, tid=", id);
    Ok(thread)
}

/// Coloca uma thread recém-criada na run queue.
pub fn start(thread: &Arc<Thread>) {
    {
        let mut inner = thread.inner.lock();
        debug_assert_eq!(inner.state, ThreadState::Created);
        inner.state = ThreadState::Ready;
    }
    crate::core::sched::enqueue(thread.clone());
}

/// Busca por id.
pub fn lookup(id: Tid) -> Option<Arc<Thread>> {
    THREADS.lock().lookup(id).cloned()
}

/// Thread corrente desta CPU.
pub fn current() -> Option<Arc<Thread>> {
    crate::core::sched::current_thread()
}

/// Marca a thread para morte. A morte é observada no próximo ponto de
/// suspensão: parks interrompíveis retornam `Interrupted`.
pub fn kill(id: Tid) -> KResult<()> {
    let thread = lookup(id).ok_or(Status::NotFound)?;
    thread.kill_flag.store(true, Ordering::Release);
    crate::core::sched::wake(&thread, Err(Status::Interrupted));
    Ok(())
}

/// Termina a thread corrente. Nunca retorna.
pub fn exit(status: i32) -> ! {
    let thread = match current() {
        Some(thread) => thread,
        None => crate::core::panic_hard("exit sem thread corrente"),
    };
    thread.inner.lock().exit_status = status;
    // Fora da tabela antes do sinal: quem armar o evento depois de perder
    // o sinal vê a thread ausente e sinaliza na hora
    THREADS.lock().remove(thread.id);
    crate::core::process::detach_thread(thread.owner, thread.id, status);
    thread.events.signal(EVENT_DEATH, status as u64);
    crate::kdebug!("thread encerrada, tid=", thread.id);
    drop(thread);
    crate::core::sched::exit_current();
}

/// Se a thread corrente foi marcada para morte, morre aqui. Chamado nos
/// pontos de suspensão e na saída de syscall.
pub fn exit_if_killed() {
    if let Some(thread) = current() {
        if thread.kill_flag.load(Ordering::Acquire) {
            exit(-1);
        }
    }
}

/// Dorme por `ns` nanosegundos. Interrompível por kill.
pub fn sleep_ns(ns: u64) -> KResult<()> {
    match crate::core::sched::park_current(ns as i64, true) {
        Err(Status::TimedOut) => Ok(()), // o timeout é o acordar esperado
        other => other,
    }
}

/// Ajusta o IPL da thread corrente e devolve o anterior.
///
/// Baixar o nível drena as interrupções de thread que ficaram admissíveis.
pub fn set_ipl(mode: IplMode, new_ipl: u8) -> u8 {
    debug_assert!(new_ipl <= IPL_MAX);
    let thread = match current() {
        Some(thread) => thread,
        None => return 0,
    };
    let old = thread.ipl.load(Ordering::Acquire);
    if matches!(mode, IplMode::Raise) && new_ipl <= old {
        return old;
    }
    thread.ipl.store(new_ipl, Ordering::Release);
    if new_ipl < old {
        thread.drain_interrupts();
    }
    old
}

/// Enfileira uma interrupção de thread. Se o alvo roda agora em outra CPU,
/// um IPI o faz passar pelo ponto de entrega.
pub fn queue_interrupt(thread: &Arc<Thread>, intr: ThreadInterrupt) {
    let deliver_now = {
        let mut inner = thread.inner.lock();
        inner.pending_interrupts.push(intr);
        inner.state == ThreadState::Running
    };
    let is_current = current().map_or(false, |cur| cur.id == thread.id);
    if is_current {
        thread.drain_interrupts();
    } else if deliver_now {
        Cpu::send_reschedule_ipi(thread.cpu.load(Ordering::Acquire));
    } else {
        // Acordar um alvo dormindo para que passe pelo dreno
        crate::core::sched::wake(thread, Ok(()));
    }
}

/// Token efetivo do chamador: o assumido pela thread corrente, senão o do
/// processo dono, senão o do kernel.
pub fn effective_token() -> Arc<Token> {
    if let Some(thread) = current() {
        if let Some(token) = thread.inner.lock().token.clone() {
            return token;
        }
        if let Some(process) = crate::core::process::lookup(thread.owner) {
            return process.token();
        }
    }
    Token::kernel()
}

/// Assume um token na thread corrente; `None` volta ao token do processo.
pub fn set_current_token(token: Option<Arc<Token>>) -> KResult<()> {
    let thread = current().ok_or(Status::NotSupported)?;
    thread.inner.lock().token = token;
    Ok(())
}

impl KernelObject for Thread {
    fn otype(&self) -> ObjectType {
        ObjectType::Thread
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn attach_event(&self, reg: &Arc<EventRegistration>) -> KResult<()> {
        if reg.event_id != EVENT_DEATH {
            return Err(Status::InvalidEvent);
        }
        self.events.attach(reg.clone());
        // Nível: thread já fora da tabela morreu antes do attach
        if !reg.wants_edge() && lookup(self.id).is_none() {
            reg.signal(self.inner.lock().exit_status as u64);
            if reg.oneshot() {
                self.events.detach(reg);
            }
        }
        Ok(())
    }

    fn detach_event(&self, reg: &Arc<EventRegistration>) {
        self.events.detach(reg);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }
}

/// O endereço cai na guarda de pilha da thread corrente?
pub fn in_stack_guard(addr: u64) -> bool {
    current().map_or(false, |thread| thread.stack_guard().contains(&addr))
}

/// Threads vivas (diagnóstico).
pub fn count() -> usize {
    THREADS.lock().len()
}
