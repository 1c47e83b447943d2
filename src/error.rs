// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error taxonomy)
//!
//! - OpenError:    输入源打开失败 (同步返回给命令线程, 状态保持 Stopped)
//! - LoadError:    模型加载失败 (在工作线程启动之前返回)
//! - FrameError:   单帧读取错误 / 关闭后使用
//! - ControlError: 播放控制的契约错误

use std::path::PathBuf;

use thiserror::Error;

/// 输入源打开失败
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("输入源不存在: {0}")]
    NotFound(PathBuf),

    #[error("不支持的输入源: {0}")]
    Unsupported(String),

    #[error("设备不可用: {0}")]
    DeviceUnavailable(String),

    #[error("解码器启动失败: {0}")]
    Decoder(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 模型加载失败
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("模型文件不存在: {0}")]
    NotFound(PathBuf),

    #[error("模型格式不兼容: {0}")]
    Incompatible(String),

    #[error("推理后端未启用: {0}")]
    BackendUnavailable(&'static str),

    #[error("推理后端错误: {0}")]
    Backend(String),
}

/// 读帧错误
#[derive(Debug, Error)]
pub enum FrameError {
    /// 单帧解码失败, 跳过该帧后可继续读取
    #[error("单帧解码失败: {0}")]
    TransientRead(String),

    #[error("输入源已关闭")]
    UseAfterClose,

    /// 输入源不可恢复的错误, 会话按流结束处理
    #[error("输入源错误: {0}")]
    Fatal(String),
}

/// 播放控制错误
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("已有会话在运行, 请先关闭")]
    AlreadyOpen,

    #[error("当前没有打开的会话")]
    NotOpen,

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("工作线程启动失败: {0}")]
    Spawn(std::io::Error),
}
