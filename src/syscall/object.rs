//! Syscalls de objetos e handles

use super::{current_process, finish_handle, finish_value};
use crate::core::object::{self, DuplicateMode, EventFlags, HandleFlags, ObjectEvent, WaitFlags};
use crate::core::status::result_to_isize;
use crate::mm::safe;
use crate::{KResult, Status};
use alloc::vec::Vec;

/// Eventos por chamada de wait
pub const MAX_WAIT_EVENTS: usize = 32;

/// Layout de um evento na memória do usuário
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UserObjectEvent {
    pub handle: u32,
    pub event: u32,
    /// Saída: dado do evento quando sinalizado
    pub data: u64,
    /// Entrada EDGE/ONESHOT; saída SIGNALLED/ERROR
    pub flags: u32,
    pub _pad: u32,
}

pub fn sys_object_wait(events_ptr: u64, count: usize, flags: u32, timeout_ns: i64) -> isize {
    result_to_isize(wait_inner(events_ptr, count, flags, timeout_ns))
}

fn wait_inner(events_ptr: u64, count: usize, flags: u32, timeout_ns: i64) -> KResult<()> {
    if count == 0 || count > MAX_WAIT_EVENTS {
        return Err(Status::InvalidArg);
    }
    let stride = core::mem::size_of::<UserObjectEvent>() as u64;
    let mut events: Vec<ObjectEvent> = Vec::with_capacity(count);
    for i in 0..count {
        let user: UserObjectEvent = safe::read_user(events_ptr + i as u64 * stride)?;
        events.push(ObjectEvent {
            handle: user.handle,
            event: user.event,
            data: 0,
            flags: EventFlags::from_bits_truncate(user.flags)
                & (EventFlags::EDGE | EventFlags::ONESHOT),
        });
    }

    let result = object::object_wait(&mut events, WaitFlags::from_bits_truncate(flags), timeout_ns);

    // As flags de saída voltam mesmo em timeout ou erro parcial; o
    // chamador distingue quais eventos dispararam
    for (i, event) in events.iter().enumerate() {
        let addr = events_ptr + i as u64 * stride;
        let mut user: UserObjectEvent = safe::read_user(addr)?;
        user.data = event.data;
        user.flags = event.flags.bits();
        safe::write_user(addr, user)?;
    }
    result
}

/// A entrega de callbacks em espaço de usuário depende do retorno a ring 3,
/// que a camada de arquitetura ainda não oferece.
pub fn sys_object_callback(handle: u32, _event: u32, func: u64) -> isize {
    result_to_isize(callback_inner(handle, func))
}

fn callback_inner(handle: u32, func: u64) -> KResult<()> {
    let caller = current_process()?;
    caller.handles.lookup(handle)?;
    safe::validate_user_range(func, 1)?;
    Err(Status::NotImplemented)
}

pub fn sys_object_type(handle: u32) -> isize {
    match type_inner(handle) {
        Ok(otype) => otype as isize,
        Err(status) => status.as_isize(),
    }
}

fn type_inner(handle: u32) -> KResult<u32> {
    let caller = current_process()?;
    Ok(caller.handles.lookup_object(handle)?.otype() as u32)
}

pub fn sys_handle_close(handle: u32) -> isize {
    result_to_isize(close_inner(handle))
}

fn close_inner(handle: u32) -> KResult<()> {
    current_process()?.handles.close(handle)
}

pub fn sys_handle_duplicate(mode: u32, src: u32, dst: u32, out: u64) -> isize {
    finish_handle(out, duplicate_inner(mode, src, dst))
}

fn duplicate_inner(mode: u32, src: u32, dst: u32) -> KResult<u32> {
    let caller = current_process()?;
    let entry = caller.handles.lookup(src)?;
    let mode = match mode {
        0 => DuplicateMode::Allocate,
        1 => DuplicateMode::Exact(dst),
        _ => return Err(Status::InvalidArg),
    };
    caller.handles.duplicate(src, mode, entry.flags)
}

pub fn sys_handle_flags(handle: u32, out: u64) -> isize {
    finish_value(out, flags_inner(handle))
}

fn flags_inner(handle: u32) -> KResult<u32> {
    Ok(current_process()?.handles.lookup(handle)?.flags.bits())
}

pub fn sys_handle_set_flags(handle: u32, flags: u32) -> isize {
    result_to_isize(set_flags_inner(handle, flags))
}

fn set_flags_inner(handle: u32, flags: u32) -> KResult<()> {
    let flags = HandleFlags::from_bits(flags).ok_or(Status::InvalidArg)?;
    current_process()?.handles.set_flags(handle, flags)
}
