//! Syscalls de sockets
//!
//! A pilha de protocolos roda fora do kernel; aqui só existe a superfície.
//! Criar um socket responde `NetDown` enquanto nenhuma interface de rede
//! estiver registrada; as demais operações respondem `NotSupported` porque
//! nenhum handle de socket pode existir ainda.

use crate::core::object::INVALID_HANDLE;
use crate::drivers::class::net;
use crate::mm::safe;
use crate::Status;

pub fn sys_socket_create(_domain: u32, _stype: u32, _protocol: u32, out: u64) -> isize {
    if out != 0 && safe::write_user(out, INVALID_HANDLE).is_err() {
        return Status::InvalidAddr.as_isize();
    }
    if net::interfaces().is_empty() {
        return Status::NetDown.as_isize();
    }
    Status::NotSupported.as_isize()
}

pub fn sys_socket_unbound() -> isize {
    Status::NotSupported.as_isize()
}
