//! Interface de syscalls
//!
//! A tabela é indexada pelo número da chamada. Cada entrada valida os
//! argumentos pela camada de cópia segura antes de tocar em qualquer
//! ponteiro e devolve um `Status` como isize negativo; zero ou um valor
//! positivo é sucesso. Syscalls que produzem handle escrevem
//! `INVALID_HANDLE` no ponteiro de saída em qualquer falha.
//!
//! O despacho verifica a marca de kill da thread na entrada e na saída e
//! drena as interrupções de thread admissíveis antes de voltar; é o único
//! ponto de entrega garantido para quem nunca dorme.

mod condition;
mod file;
mod object;
mod process;
mod socket;
mod thread;

pub use object::{UserObjectEvent, MAX_WAIT_EVENTS};
pub use process::{UserProcessAttrib, UserSecurity, PROCESS_CREATE_INHERIT};

use crate::core::object::INVALID_HANDLE;
use crate::core::status::result_to_isize;
use crate::mm::safe;
use crate::{KResult, Status};
use alloc::sync::Arc;

pub const SYS_PUTCH: usize = 0;
pub const SYS_OBJECT_WAIT: usize = 1;
pub const SYS_OBJECT_CALLBACK: usize = 2;
pub const SYS_OBJECT_TYPE: usize = 3;
pub const SYS_HANDLE_CLOSE: usize = 4;
pub const SYS_HANDLE_DUPLICATE: usize = 5;
pub const SYS_HANDLE_FLAGS: usize = 6;
pub const SYS_HANDLE_SET_FLAGS: usize = 7;

pub const SYS_PROCESS_CREATE: usize = 16;
pub const SYS_PROCESS_EXEC: usize = 17;
pub const SYS_PROCESS_CLONE: usize = 18;
pub const SYS_PROCESS_OPEN: usize = 19;
pub const SYS_PROCESS_ID: usize = 20;
pub const SYS_PROCESS_KILL: usize = 21;
pub const SYS_PROCESS_EXIT: usize = 22;
pub const SYS_PROCESS_SECURITY: usize = 23;
pub const SYS_PROCESS_SET_TOKEN: usize = 24;
pub const SYS_PROCESS_PORT: usize = 25;
pub const SYS_PROCESS_STATUS: usize = 26;

pub const SYS_THREAD_CREATE: usize = 32;
pub const SYS_THREAD_OPEN: usize = 33;
pub const SYS_THREAD_ID: usize = 34;
pub const SYS_THREAD_KILL: usize = 35;
pub const SYS_THREAD_SLEEP: usize = 36;
pub const SYS_THREAD_EXIT: usize = 37;
pub const SYS_THREAD_SET_IPL: usize = 38;
pub const SYS_THREAD_TOKEN: usize = 39;
pub const SYS_THREAD_SET_TOKEN: usize = 40;
pub const SYS_THREAD_SET_EXCEPTION_HANDLER: usize = 41;
pub const SYS_THREAD_SET_EXCEPTION_STACK: usize = 42;

pub const SYS_CONDITION_CREATE: usize = 48;
pub const SYS_CONDITION_SET: usize = 49;

pub const SYS_FILE_OPEN: usize = 56;
pub const SYS_FILE_READ: usize = 57;
pub const SYS_FILE_WRITE: usize = 58;
pub const SYS_FILE_SEEK: usize = 59;
pub const SYS_FILE_RESIZE: usize = 60;

pub const SYS_DEVICE_OPEN: usize = 64;
pub const SYS_DEVICE_REQUEST: usize = 65;

pub const SYS_SOCKET_CREATE: usize = 80;
pub const SYS_SOCKET_BIND: usize = 81;
pub const SYS_SOCKET_LISTEN: usize = 82;
pub const SYS_SOCKET_ACCEPT: usize = 83;
pub const SYS_SOCKET_CONNECT: usize = 84;
pub const SYS_SOCKET_SEND: usize = 85;
pub const SYS_SOCKET_RECV: usize = 86;
pub const SYS_SOCKET_GETSOCKOPT: usize = 87;
pub const SYS_SOCKET_SETSOCKOPT: usize = 88;
pub const SYS_SOCKET_SHUTDOWN: usize = 89;

/// Ponto de entrada comum dos vetores de syscall das arquiteturas.
pub fn dispatch(num: usize, args: [u64; 6]) -> isize {
    crate::core::thread::exit_if_killed();
    let ret = table(num, args);
    // Kill pedido durante a chamada morre aqui; interrupções de thread
    // admissíveis no IPL corrente saem antes da volta ao usuário
    crate::core::thread::exit_if_killed();
    if let Some(thread) = crate::core::thread::current() {
        thread.drain_interrupts();
    }
    ret
}

fn table(num: usize, a: [u64; 6]) -> isize {
    match num {
        SYS_PUTCH => sys_putch(a[0]),
        SYS_OBJECT_WAIT => object::sys_object_wait(a[0], a[1] as usize, a[2] as u32, a[3] as i64),
        SYS_OBJECT_CALLBACK => object::sys_object_callback(a[0] as u32, a[1] as u32, a[2]),
        SYS_OBJECT_TYPE => object::sys_object_type(a[0] as u32),
        SYS_HANDLE_CLOSE => object::sys_handle_close(a[0] as u32),
        SYS_HANDLE_DUPLICATE => {
            object::sys_handle_duplicate(a[0] as u32, a[1] as u32, a[2] as u32, a[3])
        }
        SYS_HANDLE_FLAGS => object::sys_handle_flags(a[0] as u32, a[1]),
        SYS_HANDLE_SET_FLAGS => object::sys_handle_set_flags(a[0] as u32, a[1] as u32),

        SYS_PROCESS_CREATE => {
            process::sys_process_create(a[0], a[1], a[2], a[3] as u32, a[4], a[5])
        }
        SYS_PROCESS_EXEC => process::sys_process_exec(a[0], a[1], a[2], a[3] as u32),
        SYS_PROCESS_CLONE => process::sys_process_clone(a[0]),
        SYS_PROCESS_OPEN => process::sys_process_open(a[0], a[1]),
        SYS_PROCESS_ID => process::sys_process_id(a[0] as u32),
        SYS_PROCESS_KILL => process::sys_process_kill(a[0] as u32),
        SYS_PROCESS_EXIT => process::sys_process_exit(a[0] as i32),
        SYS_PROCESS_SECURITY => process::sys_process_security(a[0] as u32, a[1]),
        SYS_PROCESS_SET_TOKEN => process::sys_process_set_token(a[0] as u32, a[1] as u32),
        SYS_PROCESS_PORT => process::sys_process_port(a[0], a[1]),
        SYS_PROCESS_STATUS => process::sys_process_status(a[0] as u32, a[1], a[2]),

        SYS_THREAD_CREATE => {
            thread::sys_thread_create(a[0], a[1], a[2], a[3], a[4] as u32, a[5])
        }
        SYS_THREAD_OPEN => thread::sys_thread_open(a[0], a[1]),
        SYS_THREAD_ID => thread::sys_thread_id(a[0] as u32),
        SYS_THREAD_KILL => thread::sys_thread_kill(a[0] as u32),
        SYS_THREAD_SLEEP => thread::sys_thread_sleep(a[0], a[1]),
        SYS_THREAD_EXIT => thread::sys_thread_exit(a[0] as i32),
        SYS_THREAD_SET_IPL => thread::sys_thread_set_ipl(a[0] as u32, a[1] as u32, a[2]),
        SYS_THREAD_TOKEN => thread::sys_thread_token(a[0]),
        SYS_THREAD_SET_TOKEN => thread::sys_thread_set_token(a[0] as u32),
        SYS_THREAD_SET_EXCEPTION_HANDLER => {
            thread::sys_thread_set_exception_handler(a[0] as u32, a[1])
        }
        SYS_THREAD_SET_EXCEPTION_STACK => thread::sys_thread_set_exception_stack(a[0]),

        SYS_CONDITION_CREATE => condition::sys_condition_create(a[0]),
        SYS_CONDITION_SET => condition::sys_condition_set(a[0] as u32, a[1]),

        SYS_FILE_OPEN => file::sys_file_open(a[0], a[1] as u32, a[2] as u32, a[3]),
        SYS_FILE_READ => file::sys_file_read(a[0] as u32, a[1], a[2] as usize, a[3]),
        SYS_FILE_WRITE => file::sys_file_write(a[0] as u32, a[1], a[2] as usize, a[3]),
        SYS_FILE_SEEK => file::sys_file_seek(a[0] as u32, a[1] as u32, a[2] as i64, a[3]),
        SYS_FILE_RESIZE => file::sys_file_resize(a[0] as u32, a[1]),

        SYS_DEVICE_OPEN => file::sys_device_open(a[0], a[1] as u32, a[2] as u32, a[3]),
        SYS_DEVICE_REQUEST => file::sys_device_request(
            a[0] as u32,
            a[1] as u32,
            a[2],
            a[3] as usize,
            a[4],
            a[5] as usize,
        ),

        SYS_SOCKET_CREATE => socket::sys_socket_create(a[0] as u32, a[1] as u32, a[2] as u32, a[3]),
        SYS_SOCKET_BIND..=SYS_SOCKET_SHUTDOWN => socket::sys_socket_unbound(),

        _ => Status::InvalidSyscall.as_isize(),
    }
}

/// Console de diagnóstico, um byte por chamada.
fn sys_putch(ch: u64) -> isize {
    let buf = [ch as u8];
    match core::str::from_utf8(&buf) {
        Ok(s) => {
            crate::drivers::serial::emit_str(s);
            0
        }
        Err(_) => Status::InvalidArg.as_isize(),
    }
}

/// Processo do chamador. Syscalls fora de um processo não fazem sentido.
fn current_process() -> KResult<Arc<crate::core::process::Process>> {
    crate::core::process::current().ok_or(Status::NotSupported)
}

/// Escreve o handle produzido (ou `INVALID_HANDLE`) em `out` e converte o
/// resultado. Se a escrita falhar, o handle recém-alocado é fechado.
fn finish_handle(out: u64, result: KResult<u32>) -> isize {
    let value = *result.as_ref().unwrap_or(&INVALID_HANDLE);
    if safe::write_user(out, value).is_err() {
        if let Ok(handle) = result {
            if let Ok(caller) = current_process() {
                let _ = caller.handles.close(handle);
            }
        }
        return Status::InvalidAddr.as_isize();
    }
    result_to_isize(result.map(|_| ()))
}

/// Escreve o valor produzido em `out`; com `out` nulo o valor é descartado.
fn finish_value<T: Copy>(out: u64, result: KResult<T>) -> isize {
    match result {
        Ok(value) => {
            if out == 0 {
                return 0;
            }
            result_to_isize(safe::write_user(out, value))
        }
        Err(status) => status.as_isize(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_number_is_invalid_syscall() {
        assert_eq!(dispatch(9999, [0; 6]), Status::InvalidSyscall.as_isize());
    }

    #[test]
    fn wait_count_is_bounded() {
        assert_eq!(
            dispatch(SYS_OBJECT_WAIT, [0; 6]),
            Status::InvalidArg.as_isize()
        );
        let over = [0, (MAX_WAIT_EVENTS + 1) as u64, 0, 0, 0, 0];
        assert_eq!(dispatch(SYS_OBJECT_WAIT, over), Status::InvalidArg.as_isize());
    }

    #[test]
    fn handle_calls_need_a_process_context() {
        // Nos testes de host não há processo corrente
        assert_eq!(
            dispatch(SYS_HANDLE_CLOSE, [3, 0, 0, 0, 0, 0]),
            Status::NotSupported.as_isize()
        );
        assert_eq!(
            dispatch(SYS_OBJECT_TYPE, [3, 0, 0, 0, 0, 0]),
            Status::NotSupported.as_isize()
        );
    }

    #[test]
    fn unbound_socket_calls_are_rejected() {
        assert_eq!(
            dispatch(SYS_SOCKET_BIND, [0; 6]),
            Status::NotSupported.as_isize()
        );
        assert_eq!(
            dispatch(SYS_SOCKET_SHUTDOWN, [0; 6]),
            Status::NotSupported.as_isize()
        );
    }

    #[test]
    fn user_event_layout_is_stable() {
        assert_eq!(core::mem::size_of::<UserObjectEvent>(), 24);
        assert_eq!(core::mem::align_of::<UserObjectEvent>(), 8);
    }
}
