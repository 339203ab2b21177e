//! Travessia segura kernel↔usuário
//!
//! Toda syscall valida ponteiros de usuário por aqui antes de tocar neles.
//! A validação é de range; a cópia assume que o contexto de MMU corrente é o
//! do processo dono do buffer.

use crate::arch::mmu::{USER_BASE, USER_SIZE};
use crate::{KResult, Status};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

/// Limite de strings vindas do usuário (paths, nomes)
pub const MAX_USER_STRING: usize = 4096;

/// Valida que `[base, base+len)` cabe no espaço de usuário.
pub fn validate_user_range(base: u64, len: usize) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = base.checked_add(len as u64).ok_or(Status::InvalidAddr)?;
    if base < USER_BASE || end > USER_BASE + USER_SIZE {
        return Err(Status::InvalidAddr);
    }
    Ok(())
}

/// Copia `dst.len()` bytes do usuário para o kernel.
pub fn copy_from_user(dst: &mut [u8], user_src: u64) -> KResult<()> {
    validate_user_range(user_src, dst.len())?;
    // SAFETY: range validado; faltas viram exceção tratada pelo fault handler
    unsafe {
        core::ptr::copy_nonoverlapping(user_src as *const u8, dst.as_mut_ptr(), dst.len());
    }
    Ok(())
}

/// Copia `src` para um buffer do usuário.
pub fn copy_to_user(user_dst: u64, src: &[u8]) -> KResult<()> {
    validate_user_range(user_dst, src.len())?;
    // SAFETY: range validado
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), user_dst as *mut u8, src.len());
    }
    Ok(())
}

/// Lê um valor plano (repr(C), sem ponteiros) do usuário.
pub fn read_user<T: Copy>(user_src: u64) -> KResult<T> {
    validate_user_range(user_src, core::mem::size_of::<T>())?;
    if user_src % core::mem::align_of::<T>() as u64 != 0 {
        return Err(Status::InvalidAddr);
    }
    // SAFETY: range e alinhamento validados; T é Copy
    Ok(unsafe { core::ptr::read(user_src as *const T) })
}

/// Escreve um valor plano no usuário.
pub fn write_user<T: Copy>(user_dst: u64, value: T) -> KResult<()> {
    validate_user_range(user_dst, core::mem::size_of::<T>())?;
    if user_dst % core::mem::align_of::<T>() as u64 != 0 {
        return Err(Status::InvalidAddr);
    }
    // SAFETY: range e alinhamento validados
    unsafe { core::ptr::write(user_dst as *mut T, value) };
    Ok(())
}

/// Copia uma string NUL-terminada do usuário, até `MAX_USER_STRING` bytes.
pub fn string_from_user(user_ptr: u64) -> KResult<String> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut addr = user_ptr;
    loop {
        if bytes.len() >= MAX_USER_STRING {
            return Err(Status::TooLong);
        }
        let byte: u8 = read_user(addr)?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        addr += 1;
    }
    String::from_utf8(bytes).map_err(|_| Status::InvalidArg)
}

/// Copia `len` bytes do usuário para um Vec novo.
pub fn bytes_from_user(user_src: u64, len: usize) -> KResult<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    copy_from_user(&mut buffer, user_src)?;
    Ok(buffer)
}
