//! 虚拟栈模型
//!
//! 栈指针本身是一个符号值（`$sp`），这里只跟踪相对它的净位移。压栈先减去槽大小
//! 再写 `[$sp + disp]`，出栈先读 `[$sp + disp]` 再加回槽大小，与向下增长的硬件栈一致。

use vmp_core::Width;

/// 一个宽度的值在虚拟栈上占用的字节数（字节值占 2 字节槽）
pub const fn slot_size(width: Width) -> i64 {
    let bytes = width.bytes();
    if bytes < 2 { 2 } else { bytes as i64 }
}

/// 符号栈指针的位移状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualStack {
    displacement: i64,
    rebases: usize,
}

impl VirtualStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 相对当前 `$sp` 的净位移
    pub fn displacement(&self) -> i64 {
        self.displacement
    }

    /// `POPVSP` 重新设置栈指针的次数
    pub fn rebases(&self) -> usize {
        self.rebases
    }

    /// 为压栈预留一个槽，返回写入位置
    pub fn push(&mut self, width: Width) -> i64 {
        self.displacement -= slot_size(width);
        self.displacement
    }

    /// 返回读取位置并释放一个槽
    pub fn pop(&mut self, width: Width) -> i64 {
        let at = self.displacement;
        self.displacement += slot_size(width);
        at
    }

    /// `$sp` 被整体替换，位移从零开始
    pub fn rebase(&mut self) {
        self.displacement = 0;
        self.rebases += 1;
    }

    /// 入口处捕获本地栈指针
    pub fn reset(&mut self) {
        self.displacement = 0;
    }
}
