//! Truvis 工具集
//!
//! 提供在各个 engine crate 之间共享的日志初始化。

pub mod init_log;
