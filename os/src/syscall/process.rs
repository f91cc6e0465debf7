//! 环境相关的系统调用
use crate::task::EnvControlBlock;

/// 父环境的编号，没有父环境时为 0
pub fn sys_getppid(env: &EnvControlBlock) -> isize {
    trace!("kernel: env[{}] sys_getppid", env.getid());
    env.getppid().map_or(0, |ppid| ppid as isize)
}
