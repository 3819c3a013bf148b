//! 虚拟操作码助记符
//!
//! 助记符由外部的 handler 识别器给出。表中出现但没有对应 lifter 的助记符（如 `JMP`）
//! 在分派时会以 `UnknownMnemonic` 失败。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

macro_rules! mnemonics {
    ($($name:ident),* $(,)?) => {
        /// 虚拟机 handler 的助记符
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[allow(clippy::upper_case_acronyms)]
        pub enum Mnemonic {
            $($name),*
        }

        impl Mnemonic {
            /// 全部助记符
            pub const ALL: &'static [Mnemonic] = &[$(Mnemonic::$name),*];

            /// 文本名称
            pub const fn name(self) -> &'static str {
                match self {
                    $(Mnemonic::$name => stringify!($name)),*
                }
            }
        }
    };
}

mnemonics! {
    // 边界伪助记符
    VMENTER, VMEXIT,
    // 常量
    LCONSTQ, LCONSTDW, LCONSTW, LCONSTBZXW, LCONSTBSXW, LCONSTBSXDW, LCONSTBSXQ,
    LCONSTWSXDW, LCONSTWSXQ, LCONSTDWSXQ,
    // 寄存器文件
    SREGQ, SREGDW, SREGW, SREGB,
    LREGQ, LREGDW, LREGW, LREGB,
    // 算术
    ADDQ, ADDDW, ADDW, ADDB,
    MULQ, MULDW, MULW,
    DIVDW, DIVW,
    // 内存
    READQ, READDW, READW, READB,
    WRITEQ, WRITEDW, WRITEW, WRITEB,
    // 位运算
    NANDQ, NANDDW, NANDW, NANDB,
    NORQ, NORDW, NORW, NORB,
    // 移位
    SHRQ, SHRDW, SHRW, SHRB,
    SHLQ, SHLDW, SHLW, SHLB,
    SHLDQ, SHLDDW, SHRDQ, SHRDDW,
    // 栈指针 / 标志
    PUSHVSP, POPVSP, LFLAGS,
    // 本地逃逸
    RDTSC, CPUID,
    // 控制流（单个代码单元之外，没有 lifter）
    JMP, CALL,
}

impl Mnemonic {
    /// 是否为入口/出口伪助记符
    pub const fn is_boundary(self) -> bool {
        matches!(self, Mnemonic::VMENTER | Mnemonic::VMEXIT)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mnemonic {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Mnemonic::ALL
            .iter()
            .copied()
            .find(|m| m.name() == upper)
            .ok_or_else(|| ParseError::Mnemonic(s.to_string()))
    }
}
