//! Syscalls de threads

use super::{current_process, finish_handle};
use crate::core::object::{HandleFlags, ObjectType, INVALID_HANDLE};
use crate::core::process::{Capabilities, Token};
use crate::core::status::result_to_isize;
use crate::core::thread::exceptions::EXCEPTION_COUNT;
use crate::core::thread::{self, IplMode, Thread, IPL_MAX};
use crate::mm::safe;
use crate::{KResult, Status};
use alloc::sync::Arc;

/// A thread alvo de um handle; `INVALID_HANDLE` designa a corrente.
fn target_thread(handle: u32) -> KResult<Arc<Thread>> {
    if handle == INVALID_HANDLE {
        return thread::current().ok_or(Status::NotSupported);
    }
    current_process()?
        .handles
        .lookup_concrete::<Thread>(handle, ObjectType::Thread)
}

pub fn sys_thread_create(
    name_ptr: u64,
    entry: u64,
    _arg: u64,
    stack: u64,
    flags: u32,
    out: u64,
) -> isize {
    finish_handle(out, create_inner(name_ptr, entry, stack, flags))
}

fn create_inner(name_ptr: u64, entry: u64, stack: u64, flags: u32) -> KResult<u32> {
    current_process()?;
    if flags != 0 {
        return Err(Status::InvalidArg);
    }
    let _name = safe::string_from_user(name_ptr)?;
    safe::validate_user_range(entry, 1)?;
    if stack != 0 {
        safe::validate_user_range(stack, 1)?;
    }
    // A entrada fica em espaço de usuário; saltar para ela exige o retorno
    // a ring 3 da camada de arquitetura
    Err(Status::NotImplemented)
}

pub fn sys_thread_open(tid: u64, out: u64) -> isize {
    finish_handle(out, open_inner(tid))
}

fn open_inner(tid: u64) -> KResult<u32> {
    let caller = current_process()?;
    let target = thread::lookup(tid).ok_or(Status::NotFound)?;
    caller.handles.insert(target, HandleFlags::empty())
}

pub fn sys_thread_id(handle: u32) -> isize {
    match target_thread(handle) {
        Ok(target) => target.id as isize,
        Err(status) => status.as_isize(),
    }
}

pub fn sys_thread_kill(handle: u32) -> isize {
    result_to_isize(kill_inner(handle))
}

fn kill_inner(handle: u32) -> KResult<()> {
    let caller = current_process()?;
    let target = target_thread(handle)?;
    if target.owner != caller.id && !thread::effective_token().has_cap(Capabilities::PROC_ADMIN) {
        return Err(Status::AccessDenied);
    }
    thread::kill(target.id)
}

pub fn sys_thread_sleep(ns: u64, rem_ptr: u64) -> isize {
    result_to_isize(sleep_inner(ns, rem_ptr))
}

fn sleep_inner(ns: u64, rem_ptr: u64) -> KResult<()> {
    if rem_ptr != 0 {
        safe::validate_user_range(rem_ptr, core::mem::size_of::<u64>())?;
    }
    let start = crate::core::time::now_ns();
    match thread::sleep_ns(ns) {
        Ok(()) => {
            if rem_ptr != 0 {
                safe::write_user(rem_ptr, 0u64)?;
            }
            Ok(())
        }
        Err(status) => {
            // Interrompida: devolve quanto faltava dormir
            if rem_ptr != 0 {
                let elapsed = crate::core::time::now_ns().saturating_sub(start);
                safe::write_user(rem_ptr, ns.saturating_sub(elapsed))?;
            }
            Err(status)
        }
    }
}

pub fn sys_thread_exit(status: i32) -> ! {
    thread::exit(status)
}

pub fn sys_thread_set_ipl(mode: u32, ipl: u32, prev_ptr: u64) -> isize {
    result_to_isize(set_ipl_inner(mode, ipl, prev_ptr))
}

fn set_ipl_inner(mode: u32, ipl: u32, prev_ptr: u64) -> KResult<()> {
    let mode = match mode {
        0 => IplMode::Raise,
        1 => IplMode::Always,
        _ => return Err(Status::InvalidArg),
    };
    if ipl > IPL_MAX as u32 {
        return Err(Status::InvalidArg);
    }
    thread::current().ok_or(Status::NotSupported)?;
    let prev = thread::set_ipl(mode, ipl as u8);
    if prev_ptr != 0 {
        safe::write_user(prev_ptr, prev as u32)?;
    }
    Ok(())
}

pub fn sys_thread_token(out: u64) -> isize {
    finish_handle(out, token_inner())
}

fn token_inner() -> KResult<u32> {
    let caller = current_process()?;
    caller
        .handles
        .insert(thread::effective_token(), HandleFlags::empty())
}

pub fn sys_thread_set_token(token_handle: u32) -> isize {
    result_to_isize(set_token_inner(token_handle))
}

fn set_token_inner(token_handle: u32) -> KResult<()> {
    if token_handle == INVALID_HANDLE {
        return thread::set_current_token(None);
    }
    let token = current_process()?
        .handles
        .lookup_concrete::<Token>(token_handle, ObjectType::Token)?;
    thread::set_current_token(Some(token))
}

pub fn sys_thread_set_exception_handler(code: u32, func: u64) -> isize {
    result_to_isize(set_exception_handler_inner(code, func))
}

fn set_exception_handler_inner(code: u32, func: u64) -> KResult<()> {
    if code as usize >= EXCEPTION_COUNT {
        return Err(Status::InvalidArg);
    }
    thread::current().ok_or(Status::NotSupported)?;
    if func != 0 {
        safe::validate_user_range(func, 1)?;
    }
    // O upcall para um handler de usuário depende do retorno a ring 3
    Err(Status::NotImplemented)
}

pub fn sys_thread_set_exception_stack(stack: u64) -> isize {
    result_to_isize(set_exception_stack_inner(stack))
}

fn set_exception_stack_inner(stack: u64) -> KResult<()> {
    thread::current().ok_or(Status::NotSupported)?;
    if stack != 0 {
        safe::validate_user_range(stack, 1)?;
    }
    Err(Status::NotImplemented)
}
