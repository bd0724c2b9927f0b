//! 基础设施模块
//!
//! 提供底层支持功能，包括：
//! - config/：配置管理（凭证解析、配置文件加载）
//! - logging/：日志系统
//! - error/：错误处理

pub mod config;
pub mod error;
pub mod logging;
