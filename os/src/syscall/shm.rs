//! 共享内存相关的系统调用
use crate::config::SHARE_NAME_MAX;
use crate::mm::MemorySet;
use crate::shm::{SharedMemoryManager, ShmError};
use crate::task::{EnvControlBlock, EnvId};
use alloc::string::String;

/// 从用户地址空间读出以 `\0` 结尾的名字，长度按字节计，内容须为 UTF-8
fn read_name(space: &MemorySet, name: *const u8) -> Result<String, ShmError> {
    let bytes = space
        .translated_bytes(name as usize, SHARE_NAME_MAX + 1)
        .map_err(|_| ShmError::InvalidAddress)?;
    if bytes.len() > SHARE_NAME_MAX {
        return Err(ShmError::InvalidName);
    }
    String::from_utf8(bytes).map_err(|_| ShmError::InvalidName)
}

fn to_ret(result: Result<usize, ShmError>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(err) => err.code(),
    }
}

/// 创建名为 `name` 的共享对象并映射到调用者的 `va` 处，返回共享对象号
pub fn sys_shm_create(
    shm: &SharedMemoryManager,
    env: &EnvControlBlock,
    name: *const u8,
    size: usize,
    writable: bool,
    va: usize,
) -> isize {
    trace!("kernel: env[{}] sys_shm_create", env.getid());
    let mut space = env.memory_set();
    to_ret(
        read_name(&space, name)
            .and_then(|name| shm.create(&mut space, env.getid(), &name, size, writable, va)),
    )
}

/// 返回 `owner` 的共享对象 `name` 的字节数
pub fn sys_shm_size(
    shm: &SharedMemoryManager,
    env: &EnvControlBlock,
    owner: EnvId,
    name: *const u8,
) -> isize {
    trace!("kernel: env[{}] sys_shm_size", env.getid());
    let name = read_name(&env.memory_set(), name);
    to_ret(name.and_then(|name| shm.size_of(owner, &name)))
}

/// 把 `owner` 的共享对象 `name` 映射到调用者的 `va` 处，返回共享对象号
pub fn sys_shm_get(
    shm: &SharedMemoryManager,
    env: &EnvControlBlock,
    owner: EnvId,
    name: *const u8,
    va: usize,
) -> isize {
    trace!("kernel: env[{}] sys_shm_get", env.getid());
    let mut space = env.memory_set();
    to_ret(read_name(&space, name).and_then(|name| shm.get(&mut space, owner, &name, va)))
}

/// 撤销调用者在 `va` 处对共享对象 `id` 的映射
pub fn sys_shm_free(shm: &SharedMemoryManager, env: &EnvControlBlock, id: usize, va: usize) -> isize {
    trace!("kernel: env[{}] sys_shm_free", env.getid());
    to_ret(shm.free(&mut env.memory_set(), id, va).map(|_| 0))
}
