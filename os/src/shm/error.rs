//! 共享内存操作的错误
use crate::mm::MapError;
use core::fmt::{self, Display, Formatter};

/// 共享内存操作失败的原因，系统调用以 [`ShmError::code`] 返回给用户
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmError {
    /// 共享对象不存在或已被回收，或编号越界
    NotFound,
    /// 同一所有者下已有同名共享对象
    AlreadyExists,
    /// 共享对象表已满且不能扩容
    NoCapacity,
    /// 物理页帧不足
    OutOfMemory,
    /// 名字为空或过长
    InvalidName,
    /// 大小为 0
    InvalidSize,
    /// 起始地址未按页对齐、超出用户地址空间或不可访问
    InvalidAddress,
    /// 目标地址区间中已有映射
    AddressInUse,
    /// 调用者在该地址处没有映射这个共享对象
    NotMapped,
}

impl ShmError {
    /// 系统调用返回值
    pub fn code(self) -> isize {
        match self {
            ShmError::NotFound => -1,
            ShmError::AlreadyExists => -2,
            ShmError::NoCapacity => -3,
            ShmError::OutOfMemory => -4,
            ShmError::InvalidName => -5,
            ShmError::InvalidSize => -6,
            ShmError::InvalidAddress => -7,
            ShmError::AddressInUse => -8,
            ShmError::NotMapped => -9,
        }
    }
}

impl Display for ShmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ShmError::NotFound => "shared object does not exist",
            ShmError::AlreadyExists => "shared object already exists",
            ShmError::NoCapacity => "no free shared object slot",
            ShmError::OutOfMemory => "out of physical frames",
            ShmError::InvalidName => "invalid shared object name",
            ShmError::InvalidSize => "invalid shared object size",
            ShmError::InvalidAddress => "invalid virtual address",
            ShmError::AddressInUse => "virtual address already mapped",
            ShmError::NotMapped => "shared object not mapped at this address",
        };
        f.write_str(msg)
    }
}

impl From<MapError> for ShmError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::OutOfMemory => ShmError::OutOfMemory,
            MapError::AlreadyMapped(_) => ShmError::AddressInUse,
        }
    }
}
