//! 共享内存内核子系统
//!
//! 在 RV64 SV39 虚拟内存之上，允许多个环境（进程）以各自的权限
//! 把同一组物理页帧映射到自己的地址空间，并通过引用计数管理其生命周期。
//!
//! - [`mm`]: 地址、物理页帧分配器、页表与地址空间
//! - [`shm`]: 共享对象表与创建/获取/释放协议
//! - [`task`]: 环境控制块与当前环境访问
//! - [`syscall`]: 面向用户态的系统调用入口

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate log;

#[macro_use]
pub mod console;
pub mod config;
pub mod logging;
pub mod mm;
mod sbi;
pub mod shm;
pub mod syscall;
pub mod task;

/// 内核启动时依次初始化日志、内存管理与共享对象表
pub fn init() {
    logging::init();
    mm::init();
    shm::init();
}
