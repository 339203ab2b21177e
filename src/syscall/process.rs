//! Syscalls de processos

use super::{current_process, finish_handle};
use crate::core::object::{HandleFlags, ObjectType, INVALID_HANDLE, MAX_HANDLES};
use crate::core::process::token::MAX_GIDS;
use crate::core::process::{self, Capabilities, ExitReason, Process, Token};
use crate::core::status::result_to_isize;
use crate::core::thread::{self, PriorityClass};
use crate::fs::{File, FileFlags, Rights};
use crate::ipc::port;
use crate::mm::safe;
use crate::{KResult, Status};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Entradas máximas de argv/envp
const MAX_ARGS: usize = 256;

/// O filho recebe cópia dos handles INHERITABLE do criador
pub const PROCESS_CREATE_INHERIT: u32 = 1 << 0;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Atributos opcionais do process_create
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UserProcessAttrib {
    /// Handle de token para o filho; `INVALID_HANDLE` herda o do criador
    pub token: u32,
    pub _pad: u32,
    /// Array de pares (handle no criador, handle no filho)
    pub map_ptr: u64,
    pub map_count: u64,
}

/// Credenciais como vistas pelo usuário
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UserSecurity {
    pub uid: u32,
    pub gid_count: u32,
    pub gids: [u32; MAX_GIDS],
    pub caps: u64,
}

/// Copia um vetor de strings NUL-terminado por um array de ponteiros
/// também NUL-terminado.
fn copy_string_vec(ptr: u64) -> KResult<Vec<String>> {
    let mut out = Vec::new();
    if ptr == 0 {
        return Ok(out);
    }
    for i in 0..MAX_ARGS as u64 {
        let entry: u64 = safe::read_user(ptr + i * 8)?;
        if entry == 0 {
            return Ok(out);
        }
        out.push(safe::string_from_user(entry)?);
    }
    Err(Status::TooLong)
}

/// Confere que o caminho aponta para um executável ELF de 64 bits.
fn check_image(path: &str) -> KResult<()> {
    let file = File::open(path, Rights::EXECUTE | Rights::READ, FileFlags::empty())?;
    let mut header = [0u8; 5];
    let n = file.read_at(0, &mut header)?;
    if n < header.len() || header[..4] != ELF_MAGIC {
        return Err(Status::UnknownImage);
    }
    // EI_CLASS: só ELF64
    if header[4] != 2 {
        return Err(Status::MalformedImage);
    }
    Ok(())
}

/// O processo alvo de um handle; `INVALID_HANDLE` designa o chamador.
fn target_process(handle: u32) -> KResult<Arc<Process>> {
    let caller = current_process()?;
    if handle == INVALID_HANDLE {
        return Ok(caller);
    }
    caller
        .handles
        .lookup_concrete::<Process>(handle, ObjectType::Process)
}

pub fn sys_process_create(
    path_ptr: u64,
    argv_ptr: u64,
    envp_ptr: u64,
    flags: u32,
    attrib_ptr: u64,
    out: u64,
) -> isize {
    finish_handle(out, create_inner(path_ptr, argv_ptr, envp_ptr, flags, attrib_ptr))
}

fn create_inner(
    path_ptr: u64,
    argv_ptr: u64,
    envp_ptr: u64,
    flags: u32,
    attrib_ptr: u64,
) -> KResult<u32> {
    let caller = current_process()?;
    if flags & !PROCESS_CREATE_INHERIT != 0 {
        return Err(Status::InvalidArg);
    }
    let path = safe::string_from_user(path_ptr)?;
    let _argv = copy_string_vec(argv_ptr)?;
    let _envp = copy_string_vec(envp_ptr)?;
    check_image(&path)?;

    // Tudo que pode falhar por causa do usuário sai da memória dele antes
    // do processo existir
    let attrib = if attrib_ptr != 0 {
        Some(safe::read_user::<UserProcessAttrib>(attrib_ptr)?)
    } else {
        None
    };
    let token = match attrib {
        Some(attrib) if attrib.token != INVALID_HANDLE => Some(
            caller
                .handles
                .lookup_concrete::<Token>(attrib.token, ObjectType::Token)?,
        ),
        _ => None,
    };
    let mut map: Vec<(u32, u32)> = Vec::new();
    if let Some(attrib) = attrib {
        if attrib.map_count > MAX_HANDLES as u64 {
            return Err(Status::InvalidArg);
        }
        for i in 0..attrib.map_count {
            let pair: [u32; 2] = safe::read_user(attrib.map_ptr + i * 8)?;
            caller.handles.lookup(pair[0])?;
            map.push((pair[0], pair[1]));
        }
    }

    let name = path.rsplit('/').next().unwrap_or(&path);
    let child = process::create(name, PriorityClass::Normal, token)?;
    if flags & PROCESS_CREATE_INHERIT != 0 {
        process::inherit_handles(&caller, &child)?;
    }
    for (src, dst) in map {
        let entry = caller.handles.lookup(src)?;
        process::install_handle(&child, dst, entry.object, entry.flags)?;
    }
    caller.handles.insert(child, HandleFlags::empty())
}

pub fn sys_process_exec(path_ptr: u64, argv_ptr: u64, envp_ptr: u64, _flags: u32) -> isize {
    result_to_isize(exec_inner(path_ptr, argv_ptr, envp_ptr))
}

fn exec_inner(path_ptr: u64, argv_ptr: u64, envp_ptr: u64) -> KResult<()> {
    current_process()?;
    let path = safe::string_from_user(path_ptr)?;
    let _argv = copy_string_vec(argv_ptr)?;
    let _envp = copy_string_vec(envp_ptr)?;
    check_image(&path)?;
    // Substituir a imagem corrente exige o retorno a ring 3 da camada de
    // arquitetura
    Err(Status::NotImplemented)
}

pub fn sys_process_clone(out: u64) -> isize {
    finish_handle(out, clone_inner())
}

fn clone_inner() -> KResult<u32> {
    current_process()?;
    // Duplicar o espaço de endereçamento e retomar o filho em modo usuário
    // fica com o mesmo retorno a ring 3
    Err(Status::NotImplemented)
}

pub fn sys_process_open(pid: u64, out: u64) -> isize {
    finish_handle(out, open_inner(pid))
}

fn open_inner(pid: u64) -> KResult<u32> {
    let caller = current_process()?;
    let target = process::lookup(pid).ok_or(Status::NotFound)?;
    caller.handles.insert(target, HandleFlags::empty())
}

pub fn sys_process_id(handle: u32) -> isize {
    match target_process(handle) {
        Ok(target) => target.id as isize,
        Err(status) => status.as_isize(),
    }
}

pub fn sys_process_kill(handle: u32) -> isize {
    result_to_isize(kill_inner(handle))
}

fn kill_inner(handle: u32) -> KResult<()> {
    let target = target_process(handle)?;
    let token = thread::effective_token();
    if !token.has_cap(Capabilities::PROC_ADMIN) && token.uid != target.token().uid {
        return Err(Status::AccessDenied);
    }
    process::kill(target.id)
}

/// Mata as threads irmãs e termina a corrente com o status dado.
pub fn sys_process_exit(status: i32) -> ! {
    if let (Some(caller), Some(current)) = (process::current(), thread::current()) {
        let siblings: Vec<u64> = caller.inner.lock().threads.clone();
        for tid in siblings {
            if tid != current.id {
                let _ = thread::kill(tid);
            }
        }
    }
    thread::exit(status)
}

pub fn sys_process_security(handle: u32, out: u64) -> isize {
    result_to_isize(security_inner(handle, out))
}

fn security_inner(handle: u32, out: u64) -> KResult<()> {
    let target = target_process(handle)?;
    let token = if handle == INVALID_HANDLE {
        thread::effective_token()
    } else {
        target.token()
    };
    let mut gids = [0u32; MAX_GIDS];
    gids[..token.gids().len()].copy_from_slice(token.gids());
    safe::write_user(out, UserSecurity {
        uid: token.uid,
        gid_count: token.gids().len() as u32,
        gids,
        caps: token.caps.bits(),
    })
}

pub fn sys_process_set_token(handle: u32, token_handle: u32) -> isize {
    result_to_isize(set_token_inner(handle, token_handle))
}

fn set_token_inner(handle: u32, token_handle: u32) -> KResult<()> {
    let caller = current_process()?;
    let target = target_process(handle)?;
    let token = caller
        .handles
        .lookup_concrete::<Token>(token_handle, ObjectType::Token)?;
    process::set_token(target.id, token)
}

pub fn sys_process_port(id: u64, out: u64) -> isize {
    finish_handle(out, port_inner(id))
}

fn port_inner(id: u64) -> KResult<u32> {
    let caller = current_process()?;
    let target = port::lookup(id).ok_or(Status::NotFound)?;
    caller.handles.insert(target, HandleFlags::empty())
}

pub fn sys_process_status(handle: u32, status_ptr: u64, reason_ptr: u64) -> isize {
    result_to_isize(status_inner(handle, status_ptr, reason_ptr))
}

fn status_inner(handle: u32, status_ptr: u64, reason_ptr: u64) -> KResult<()> {
    let target = target_process(handle)?;
    let (status, reason) = target.exit_info().ok_or(Status::StillRunning)?;
    if status_ptr != 0 {
        safe::write_user(status_ptr, status)?;
    }
    if reason_ptr != 0 {
        let code: u32 = match reason {
            ExitReason::Normal => 0,
            ExitReason::Killed => 1,
            ExitReason::Exception(_) => 2,
        };
        safe::write_user(reason_ptr, code)?;
    }
    Ok(())
}
