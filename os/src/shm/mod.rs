//! 命名共享内存
//!
//! 每个共享对象以 (所有者环境, 名字) 标识，由一组物理页帧支撑，
//! 可被多个环境映射到各自地址空间的任意页对齐位置。
//! 共享对象记录仍映射着它的环境个数，最后一个映射撤销时页帧被回收。
//!
//! 全局实例 [`SHARED_MEMORY`] 从内核页帧池 [`FRAME_ALLOCATOR`] 分配页帧。

mod error;
mod manager;
mod region;
mod registry;

use crate::mm::FRAME_ALLOCATOR;
use lazy_static::*;

pub use error::ShmError;
pub use manager::{RegionInfo, SharedMemoryManager, ShmConfig};
pub use region::{FrameStorage, Region, RegionInner};
pub use registry::Registry;

lazy_static! {
    /// 内核全局的共享对象表
    pub static ref SHARED_MEMORY: SharedMemoryManager =
        SharedMemoryManager::new(FRAME_ALLOCATOR.clone(), ShmConfig::default());
}

/// 建立共享对象表
pub fn init() {
    lazy_static::initialize(&SHARED_MEMORY);
    info!("shm: {} slots ready", SHARED_MEMORY.capacity());
}
