// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::RegexSet;
use std::fmt;

/// 标准错误输出中的致命特征
///
/// 命中后无需等待进程退出即可判定崩溃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashSignature {
    OutOfMemory,
    ModuleNotFound,
    AddressInUse,
    StackOverflow,
    SyntaxError,
    TypeError,
}

const SIGNATURES: [CrashSignature; 6] = [
    CrashSignature::OutOfMemory,
    CrashSignature::ModuleNotFound,
    CrashSignature::AddressInUse,
    CrashSignature::StackOverflow,
    CrashSignature::SyntaxError,
    CrashSignature::TypeError,
];

// Order must match SIGNATURES.
static CRITICAL_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)out of memory|memory allocation of \d+ bytes failed|cannot allocate memory|heap limit",
        r"(?i)cannot find module|module not found|error while loading shared libraries|no module named",
        r"(?i)address already in use|eaddrinuse",
        r"(?i)stack overflow|has overflowed its stack|maximum call stack size exceeded",
        r"\bSyntaxError\b",
        r"\bTypeError\b",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

impl CrashSignature {
    fn label(&self) -> &'static str {
        match self {
            CrashSignature::OutOfMemory => "out of memory",
            CrashSignature::ModuleNotFound => "module not found",
            CrashSignature::AddressInUse => "address in use",
            CrashSignature::StackOverflow => "stack overflow",
            CrashSignature::SyntaxError => "syntax error",
            CrashSignature::TypeError => "type error",
        }
    }
}

impl fmt::Display for CrashSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 检查一行标准错误输出是否包含致命特征
pub fn detect_critical(line: &str) -> Option<CrashSignature> {
    CRITICAL_PATTERNS
        .matches(line)
        .iter()
        .next()
        .map(|index| SIGNATURES[index])
}

/// 进程退出的归类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// 显式停止后的退出
    Stopped,
    /// 已上报终止消息后的退出
    Finished,
    /// 意外退出
    Crashed,
}

/// 对进程退出进行归类
///
/// 停止请求之后的退出永远不算崩溃；未收到终止消息前的任何退出都算崩溃，包括退出码0
pub fn classify_exit(stop_requested: bool, reported_terminal: bool) -> ExitClass {
    if stop_requested {
        ExitClass::Stopped
    } else if reported_terminal {
        ExitClass::Finished
    } else {
        ExitClass::Crashed
    }
}
