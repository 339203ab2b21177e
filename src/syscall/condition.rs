//! Syscalls de conditions

use super::{current_process, finish_handle};
use crate::core::condition::Condition;
use crate::core::object::{HandleFlags, ObjectType};
use crate::core::status::result_to_isize;
use crate::KResult;

pub fn sys_condition_create(out: u64) -> isize {
    finish_handle(out, create_inner())
}

fn create_inner() -> KResult<u32> {
    current_process()?
        .handles
        .insert(Condition::new(), HandleFlags::empty())
}

pub fn sys_condition_set(handle: u32, state: u64) -> isize {
    result_to_isize(set_inner(handle, state))
}

fn set_inner(handle: u32, state: u64) -> KResult<()> {
    let condition = current_process()?
        .handles
        .lookup_concrete::<Condition>(handle, ObjectType::Condition)?;
    condition.set(state != 0);
    Ok(())
}
