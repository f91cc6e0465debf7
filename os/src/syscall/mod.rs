//! 系统调用
//!
//! 用户态通过 `ecall` 陷入内核后，陷入处理程序以系统调用号和参数调用
//! 唯一的入口 [`syscall()`]。它取出当前环境与全局的共享对象表，
//! 交给 [`dispatch()`] 分发到各个 `sys_` 开头的处理函数。
//! 处理函数按类别放在子模块中。

/// getppid
pub const SYSCALL_GETPPID: usize = 173;
/// 创建共享对象
pub const SYSCALL_SHM_CREATE: usize = 450;
/// 查询共享对象大小
pub const SYSCALL_SHM_SIZE: usize = 451;
/// 映射共享对象
pub const SYSCALL_SHM_GET: usize = 452;
/// 撤销共享对象的映射
pub const SYSCALL_SHM_FREE: usize = 453;

mod process;
mod shm;

pub use process::*;
pub use shm::*;

use crate::shm::{SharedMemoryManager, SHARED_MEMORY};
use crate::task::{current_env, EnvControlBlock};

/// 处理当前环境发起的系统调用
pub fn syscall(syscall_id: usize, args: [usize; 6]) -> isize {
    let env = match current_env() {
        Some(env) => env,
        None => panic!("syscall {} without a running environment", syscall_id),
    };
    dispatch(&SHARED_MEMORY, &env, syscall_id, args)
}

/// 以 `env` 的身份、在 `shm` 上执行系统调用
pub fn dispatch(
    shm: &SharedMemoryManager,
    env: &EnvControlBlock,
    syscall_id: usize,
    args: [usize; 6],
) -> isize {
    match syscall_id {
        SYSCALL_GETPPID => sys_getppid(env),
        SYSCALL_SHM_CREATE => {
            sys_shm_create(shm, env, args[0] as *const u8, args[1], args[2] != 0, args[3])
        }
        SYSCALL_SHM_SIZE => sys_shm_size(shm, env, args[0], args[1] as *const u8),
        SYSCALL_SHM_GET => sys_shm_get(shm, env, args[0], args[1] as *const u8, args[2]),
        SYSCALL_SHM_FREE => sys_shm_free(shm, env, args[0], args[1]),
        _ => {
            warn!("env {}: unsupported syscall_id {}", env.getid(), syscall_id);
            -1
        }
    }
}
