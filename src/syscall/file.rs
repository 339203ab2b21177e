//! Syscalls de arquivos e devices
//!
//! I/O copia em pedaços por um buffer de kernel; transferência parcial é
//! sucesso com a contagem em `*bytes`, como a camada de I/O promete.

use super::{current_process, finish_handle, finish_value};
use crate::core::object::{HandleFlags, ObjectType};
use crate::core::process::Capabilities;
use crate::core::status::result_to_isize;
use crate::core::thread;
use crate::drivers::base;
use crate::fs::{File, FileFlags, Rights, SeekFrom};
use crate::mm::safe;
use crate::{KResult, Status};
use alloc::sync::Arc;
use alloc::vec;

/// Tamanho do buffer intermediário de I/O
const IO_CHUNK: usize = 64 * 1024;

fn file_from(handle: u32) -> KResult<Arc<File>> {
    current_process()?
        .handles
        .lookup_concrete::<File>(handle, ObjectType::File)
}

pub fn sys_file_open(path_ptr: u64, rights: u32, flags: u32, out: u64) -> isize {
    finish_handle(out, open_inner(path_ptr, rights, flags))
}

fn open_inner(path_ptr: u64, rights: u32, flags: u32) -> KResult<u32> {
    let caller = current_process()?;
    let path = safe::string_from_user(path_ptr)?;
    let rights = Rights::from_bits(rights).ok_or(Status::InvalidArg)?;
    let flags = FileFlags::from_bits(flags).ok_or(Status::InvalidArg)?;
    let file = File::open(&path, rights, flags)?;
    caller.handles.insert(file, HandleFlags::empty())
}

pub fn sys_file_read(handle: u32, buf: u64, len: usize, bytes_ptr: u64) -> isize {
    let mut done = 0usize;
    let result = read_inner(handle, buf, len, &mut done);
    finish_io(bytes_ptr, done, result)
}

fn read_inner(handle: u32, buf: u64, len: usize, done: &mut usize) -> KResult<()> {
    let file = file_from(handle)?;
    safe::validate_user_range(buf, len)?;
    let mut chunk = vec![0u8; len.min(IO_CHUNK)];
    while *done < len {
        let want = (len - *done).min(chunk.len());
        let got = file.read(&mut chunk[..want])?;
        if got == 0 {
            break;
        }
        safe::copy_to_user(buf + *done as u64, &chunk[..got])?;
        *done += got;
        if got < want {
            break;
        }
    }
    Ok(())
}

pub fn sys_file_write(handle: u32, buf: u64, len: usize, bytes_ptr: u64) -> isize {
    let mut done = 0usize;
    let result = write_inner(handle, buf, len, &mut done);
    finish_io(bytes_ptr, done, result)
}

fn write_inner(handle: u32, buf: u64, len: usize, done: &mut usize) -> KResult<()> {
    let file = file_from(handle)?;
    safe::validate_user_range(buf, len)?;
    let mut chunk = vec![0u8; len.min(IO_CHUNK)];
    while *done < len {
        let want = (len - *done).min(chunk.len());
        safe::copy_from_user(&mut chunk[..want], buf + *done as u64)?;
        let put = file.write(&chunk[..want])?;
        *done += put;
        if put < want {
            break;
        }
    }
    Ok(())
}

/// Publica a contagem transferida e decide o status: erro só quando nada
/// foi movido.
fn finish_io(bytes_ptr: u64, done: usize, result: KResult<()>) -> isize {
    if bytes_ptr != 0 && safe::write_user(bytes_ptr, done as u64).is_err() {
        return Status::InvalidAddr.as_isize();
    }
    match result {
        Err(status) if done == 0 => status.as_isize(),
        _ => 0,
    }
}

pub fn sys_file_seek(handle: u32, mode: u32, offset: i64, out: u64) -> isize {
    finish_value(out, seek_inner(handle, mode, offset))
}

fn seek_inner(handle: u32, mode: u32, offset: i64) -> KResult<u64> {
    let file = file_from(handle)?;
    let from = match mode {
        0 => {
            if offset < 0 {
                return Err(Status::InvalidArg);
            }
            SeekFrom::Start(offset as u64)
        }
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(Status::InvalidArg),
    };
    file.seek(from)
}

pub fn sys_file_resize(handle: u32, size: u64) -> isize {
    result_to_isize(resize_inner(handle, size))
}

fn resize_inner(handle: u32, size: u64) -> KResult<()> {
    file_from(handle)?.resize(size)
}

pub fn sys_device_open(path_ptr: u64, rights: u32, flags: u32, out: u64) -> isize {
    finish_handle(out, device_open_inner(path_ptr, rights, flags))
}

fn device_open_inner(path_ptr: u64, rights: u32, flags: u32) -> KResult<u32> {
    let caller = current_process()?;
    thread::effective_token().require(Capabilities::DEVICE_ACCESS)?;
    let path = safe::string_from_user(path_ptr)?;
    let rights = Rights::from_bits(rights).ok_or(Status::InvalidArg)?;
    let flags = FileFlags::from_bits(flags).ok_or(Status::InvalidArg)?;
    let device = base::lookup(&path)?;
    let file = File::from_node(base::fs_node(&device), rights, flags)?;
    caller.handles.insert(file, HandleFlags::empty())
}

/// Request de device. O argumento de entrada é a primeira palavra do
/// buffer `in`; o valor devolvido pelo driver vai para o buffer `out` em
/// little-endian e a contagem copiada volta como resultado não negativo.
pub fn sys_device_request(
    handle: u32,
    code: u32,
    in_ptr: u64,
    in_len: usize,
    out_ptr: u64,
    out_len: usize,
) -> isize {
    match request_inner(handle, code, in_ptr, in_len, out_ptr, out_len) {
        Ok(n) => n as isize,
        Err(status) => status.as_isize(),
    }
}

fn request_inner(
    handle: u32,
    code: u32,
    in_ptr: u64,
    in_len: usize,
    out_ptr: u64,
    out_len: usize,
) -> KResult<usize> {
    let file = file_from(handle)?;
    let arg = if in_len > 0 {
        let raw = safe::bytes_from_user(in_ptr, in_len.min(8))?;
        let mut word = [0u8; 8];
        word[..raw.len()].copy_from_slice(&raw);
        u64::from_le_bytes(word) as usize
    } else {
        0
    };
    let value = file.request(code, arg)?;
    if out_ptr != 0 && out_len > 0 {
        let raw = (value as u64).to_le_bytes();
        let n = out_len.min(raw.len());
        safe::copy_to_user(out_ptr, &raw[..n])?;
        return Ok(n);
    }
    Ok(0)
}
