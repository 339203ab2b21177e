//! Scheduler
//!
//! Run queues por CPU, uma fila por classe de prioridade, round-robin
//! dentro da classe; a classe mais alta não vazia vence. Threads acordadas
//! voltam sempre para a CPU onde rodaram por último, então só a CPU dona
//! tira uma thread da própria fila.

pub mod wait;

pub use wait::WaitQueue;

use crate::arch::context;
use crate::arch::traits::cpu::CpuOps;
use crate::arch::Cpu;
use crate::core::smp::{self, MAX_CPUS};
use crate::core::thread::{PriorityClass, Thread, ThreadState, Tid};
use crate::sync::Spinlock;
use crate::{KResult, Status};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Ticks de timeslice concedidos a cada despacho
const TIMESLICE_TICKS: u32 = 10;

struct RunQueue {
    queues: [VecDeque<Arc<Thread>>; 3],
    current: Option<Arc<Thread>>,
    idle: Option<Arc<Thread>>,
    /// Thread morta à espera do drop, feita pela próxima a rodar
    reap: Option<Arc<Thread>>,
    need_resched: bool,
}

impl RunQueue {
    const fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            current: None,
            idle: None,
            reap: None,
            need_resched: false,
        }
    }

    fn pick(&mut self) -> Option<Arc<Thread>> {
        for class in (0..3).rev() {
            if let Some(thread) = self.queues[class].pop_front() {
                return Some(thread);
            }
        }
        None
    }

    fn has_ready(&self) -> bool {
        self.queues.iter().any(|queue| !queue.is_empty())
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const RQ_INIT: Spinlock<RunQueue> = Spinlock::new("runqueue", RunQueue::new());
static RUNQUEUES: [Spinlock<RunQueue>; MAX_CPUS] = [RQ_INIT; MAX_CPUS];

static LIVE: AtomicBool = AtomicBool::new(false);

fn rq_of(cpu: u32) -> &'static Spinlock<RunQueue> {
    &RUNQUEUES[cpu as usize % MAX_CPUS]
}

fn local_rq() -> &'static Spinlock<RunQueue> {
    rq_of(Cpu::current_id())
}

fn idle_loop(_arg: usize) {
    loop {
        crate::core::work::drain();
        let ready = local_rq().lock().has_ready();
        if ready {
            reschedule();
        } else {
            // HLT com interrupções habilitadas; o próximo tick nos tira daqui
            Cpu::enable_interrupts();
            Cpu::halt();
        }
    }
}

fn make_idle(cpu: u32) {
    let idle = match crate::core::thread::create(
        "idle",
        crate::core::process::KERNEL_PID,
        PriorityClass::Low,
        idle_loop,
        cpu as usize,
    ) {
        Ok(idle) => idle,
        Err(_) => crate::core::panic_hard("sched: sem memoria para thread idle"),
    };
    idle.cpu.store(cpu, Ordering::Release);
    idle.inner.lock().state = ThreadState::Ready;
    rq_of(cpu).lock().idle = Some(idle);
}

/// Prepara o scheduler da CPU de boot.
pub fn init() {
    make_idle(0);
    crate::kinfo!("sched: pronto");
}

/// Prepara o scheduler de uma CPU de aplicação e entra nela.
pub fn init_ap() {
    let cpu = Cpu::current_id();
    make_idle(cpu);
    enter();
}

/// O scheduler está despachando?
pub fn is_live() -> bool {
    LIVE.load(Ordering::Acquire)
}

/// Thread corrente desta CPU.
pub fn current_thread() -> Option<Arc<Thread>> {
    if !is_live() {
        return None;
    }
    local_rq().lock().current.clone()
}

/// Coloca uma thread `Ready` na fila da CPU dona.
pub fn enqueue(thread: Arc<Thread>) {
    let cpu = thread.cpu.load(Ordering::Acquire);
    let class = thread.inner.lock().class as usize;
    let remote = cpu != Cpu::current_id();
    {
        let mut rq = rq_of(cpu).lock();
        rq.queues[class].push_back(thread);
        rq.need_resched = true;
    }
    if remote && is_live() {
        Cpu::send_reschedule_ipi(cpu);
    }
}

/// Acorda uma thread dormindo com o motivo dado.
///
/// `Err(Interrupted)` só acorda parks interrompíveis. Uma thread ainda não
/// em `Sleeping` (entre decidir dormir e o park) recebe um token que o
/// park consome em vez de dormir; o wake não se perde. Retorna false só
/// quando o wake foi descartado.
pub fn wake(thread: &Arc<Thread>, status: KResult<()>) -> bool {
    {
        let mut inner = thread.inner.lock();
        match inner.state {
            ThreadState::Dead => return false,
            ThreadState::Sleeping => {
                if status == Err(Status::Interrupted) && !inner.interruptible {
                    return false;
                }
                inner.wait_status = status;
                inner.state = ThreadState::Ready;
            }
            _ => {
                inner.pending_wake = Some(status);
                return status != Err(Status::Interrupted);
            }
        }
    }
    enqueue(thread.clone());
    true
}

/// Acorda por tid (callbacks de timer).
pub fn wake_tid(tid: Tid, status: KResult<()>) -> bool {
    match crate::core::thread::lookup(tid) {
        Some(thread) => wake(&thread, status),
        None => false,
    }
}

/// Suspende a thread corrente até ser acordada.
///
/// `timeout_ns`: 0 = não dorme (`TimedOut` imediato), negativo = sem
/// timeout. O retorno é o motivo do acordar; kill pendente em park
/// interrompível vira `Interrupted` sem dormir.
pub fn park_current(timeout_ns: i64, interruptible: bool) -> KResult<()> {
    debug_assert!(
        Cpu::interrupts_enabled(),
        "suspensao com interrupcoes desabilitadas (spinlock?)"
    );
    let thread = current_thread().ok_or(Status::NotSupported)?;
    if interruptible && thread.kill_flag.load(Ordering::Acquire) {
        return Err(Status::Interrupted);
    }
    if timeout_ns == 0 {
        return Err(Status::TimedOut);
    }

    let timer = if timeout_ns > 0 {
        Some(crate::core::time::timer::arm_wake(thread.id, timeout_ns as u64))
    } else {
        None
    };

    {
        let mut inner = thread.inner.lock();
        // Um wake pode ter chegado entre a decisão de dormir (ex.: entrar
        // numa wait queue) e este ponto; consumir o token no lugar de
        // dormir fecha a janela de wakeup perdido
        let pending = match inner.pending_wake {
            Some(status) if interruptible || status != Err(Status::Interrupted) => {
                inner.pending_wake = None;
                Some(status)
            }
            _ => None,
        };
        match pending {
            Some(status) => {
                drop(inner);
                if let Some(timer) = timer {
                    crate::core::time::timer::cancel(timer);
                }
                thread.drain_interrupts();
                return status;
            }
            None => {
                inner.state = ThreadState::Sleeping;
                inner.interruptible = interruptible;
                inner.wait_status = Ok(());
            }
        }
    }
    reschedule();

    if let Some(timer) = timer {
        crate::core::time::timer::cancel(timer);
    }
    {
        // Um timer atrasado deste park pode ter depositado TimedOut depois
        // do acordar real; não pode vazar para o próximo park
        let mut inner = thread.inner.lock();
        if inner.pending_wake == Some(Err(Status::TimedOut)) {
            inner.pending_wake = None;
        }
    }
    thread.drain_interrupts();
    let status = thread.inner.lock().wait_status;
    status
}

/// Cede a CPU voluntariamente.
pub fn yield_now() {
    if is_live() {
        reschedule();
    }
}

/// Tick do timer: desconta o timeslice da thread corrente.
pub fn tick() {
    if !is_live() {
        return;
    }
    let mut rq = local_rq().lock();
    if let Some(current) = rq.current.as_ref() {
        let mut inner = current.inner.lock();
        if inner.timeslice > 0 {
            inner.timeslice -= 1;
        }
        if inner.timeslice == 0 {
            drop(inner);
            rq.need_resched = true;
        }
    }
}

/// Alvo da IPI de rescheduling.
pub fn preempt_from_ipi() {
    if !is_live() {
        return;
    }
    let cpu = smp::current();
    if cpu.preempt_disable.load(Ordering::Acquire) > 0 {
        cpu.missed_preempt.store(1, Ordering::Release);
        return;
    }
    reschedule();
}

/// Desativa a preempção nesta CPU.
pub fn preempt_disable() {
    smp::current().preempt_disable.fetch_add(1, Ordering::AcqRel);
}

/// Reativa a preempção; se um pedido ficou retido, despacha agora.
pub fn preempt_enable() {
    let cpu = smp::current();
    let previous = cpu.preempt_disable.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0);
    if previous == 1 && cpu.missed_preempt.swap(0, Ordering::AcqRel) != 0 {
        reschedule();
    }
}

/// Preempção pendente nesta CPU? Consultado na saída de IRQ.
pub fn should_preempt() -> bool {
    is_live() && local_rq().lock().need_resched
}

/// Troca de contexto para a próxima thread pronta.
pub fn reschedule() {
    let interrupts_were_enabled = Cpu::interrupts_enabled();
    Cpu::disable_interrupts();

    let cpu_id = Cpu::current_id();
    let lock = rq_of(cpu_id);
    let mut rq = lock.lock_noirq();
    rq.need_resched = false;

    let prev = rq.current.take();
    let next = match rq.pick().or_else(|| {
        // Idle só roda quando não há nada pronto
        let idle = rq.idle.clone();
        idle.filter(|idle| prev.as_ref().map_or(true, |p| p.id != idle.id))
    }) {
        Some(next) => next,
        None => {
            // Nada para rodar além de quem já roda
            rq.current = prev;
            drop(rq);
            if interrupts_were_enabled {
                Cpu::enable_interrupts();
            }
            return;
        }
    };

    if let Some(prev) = prev.as_ref() {
        if next.id == prev.id {
            rq.current = Some(next);
            drop(rq);
            if interrupts_were_enabled {
                Cpu::enable_interrupts();
            }
            return;
        }
    }

    {
        let mut inner = next.inner.lock_noirq();
        inner.state = ThreadState::Running;
        inner.timeslice = TIMESLICE_TICKS;
    }
    next.cpu.store(cpu_id, Ordering::Release);
    rq.current = Some(next.clone());

    // O que fazer com a thread de saída
    let mut old_ctx: *mut context::CpuContext = core::ptr::null_mut();
    if let Some(prev) = prev {
        old_ctx = prev.context.get();
        let state = prev.inner.lock_noirq().state;
        match state {
            ThreadState::Running => {
                let class = {
                    let mut inner = prev.inner.lock_noirq();
                    inner.state = ThreadState::Ready;
                    inner.class as usize
                };
                let is_idle = rq.idle.as_ref().map_or(false, |idle| idle.id == prev.id);
                if !is_idle {
                    rq.queues[class].push_back(prev);
                }
            }
            ThreadState::Dead => {
                // O drop acontece na próxima thread, fora desta stack
                rq.reap = Some(prev);
            }
            // Sleeping/Ready: já tratada por quem mudou o estado
            _ => {}
        }
    }

    let new_ctx: *const context::CpuContext = next.context.get();

    // Trocar de espaço de endereçamento se o processo de destino tem um
    crate::core::process::switch_address_space(next.owner);
    drop(next);
    drop(rq);

    if old_ctx.is_null() {
        // Primeira entrada nesta CPU: a stack corrente é abandonada
        LIVE.store(true, Ordering::Release);
        // SAFETY: contexto preparado por setup(); interrupções desabilitadas
        unsafe { context::first_enter(&*new_ctx) };
    }

    // SAFETY: ambos os contextos pertencem a threads gerenciadas por este
    // scheduler; interrupções desabilitadas; o lock da fila já foi solto
    unsafe { context::switch(&mut *old_ctx, &*new_ctx) };

    // De volta nesta thread: recolher a morta anterior, se houver
    let reap = lock.lock_noirq().reap.take();
    drop(reap);

    if interrupts_were_enabled {
        Cpu::enable_interrupts();
    }
}

/// Entra no scheduler pela primeira vez nesta CPU. Não retorna.
pub fn enter() -> ! {
    Cpu::disable_interrupts();
    reschedule();
    crate::core::panic_hard("sched: enter retornou");
}

/// Termina a thread corrente; a fila nunca devolve o controle.
pub fn exit_current() -> ! {
    if let Some(thread) = current_thread() {
        thread.inner.lock().state = ThreadState::Dead;
    }
    reschedule();
    crate::core::panic_hard("sched: thread morta voltou a rodar");
}
