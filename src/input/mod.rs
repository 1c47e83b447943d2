// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// 所有输入都实现 `FrameSource`, 由工作线程按序拉取:
/// - SyntheticSource:     合成纯色帧 (`synthetic:<n>`), 测试与演示
/// - ImageSequenceSource: 单张图片或图片目录
/// - FfmpegSource:        视频文件 / RTSP / 摄像头 (ffmpeg 功能)
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod image_seq;
pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegSource;
pub use image_seq::ImageSequenceSource;
pub use synthetic::SyntheticSource;

use std::path::Path;

use crate::error::{FrameError, OpenError};
use crate::frame::Frame;

/// 读帧结果
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Frame),
    /// 输入源已耗尽, 之后不会再有帧
    EndOfStream,
}

/// 帧来源
///
/// 帧序号从0开始严格递增; `close` 可重复调用,
/// 关闭后 `next_frame` 返回 `FrameError::UseAfterClose`.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<SourceEvent, FrameError>;

    /// 释放底层资源 (设备/文件句柄/解码线程)
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// 源报告的帧率, 未知时为 None
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// 描述 (日志用)
    fn describe(&self) -> &str;
}

/// 把定位符解析为已打开的输入源
pub trait SourceOpener: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, OpenError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> Result<Box<dyn FrameSource>, OpenError> + Send + Sync,
{
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, OpenError> {
        self(locator)
    }
}

/// 默认打开器, 见 [`open`]
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSourceOpener;

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>, OpenError> {
        open(locator)
    }
}

/// 按定位符选择输入源
///
/// - `synthetic:<n>[:<w>x<h>]`                 合成帧
/// - `camera:<index>`                          本地摄像头
/// - `rtsp://` `rtmp://` `http://` `https://`  网络流
/// - 图片文件 / 图片目录                        图片序列
/// - 其他文件                                  视频文件
pub fn open(locator: &str) -> Result<Box<dyn FrameSource>, OpenError> {
    let locator = locator.trim();
    if locator.is_empty() {
        return Err(OpenError::Unsupported("空的输入源".to_string()));
    }

    if let Some(params) = locator.strip_prefix("synthetic:") {
        let source = SyntheticSource::parse(params)?;
        log::info!("🧪 合成输入源: {}", source.describe());
        return Ok(Box::new(source));
    }

    if let Some(index) = locator.strip_prefix("camera:") {
        let index: usize = index
            .parse()
            .map_err(|_| OpenError::Unsupported(format!("摄像头索引无效: {}", locator)))?;
        return open_camera(index);
    }

    if is_network_url(locator) {
        return open_stream(locator);
    }

    let path = Path::new(locator);
    if !path.exists() {
        return Err(OpenError::NotFound(path.to_path_buf()));
    }

    if path.is_dir() || image_seq::is_image_file(path) {
        let source = ImageSequenceSource::open(path)?;
        log::info!("🖼️ 图片序列输入: {}", source.describe());
        return Ok(Box::new(source));
    }

    open_stream(locator)
}

fn is_network_url(locator: &str) -> bool {
    ["rtsp://", "rtmp://", "http://", "https://"]
        .iter()
        .any(|scheme| locator.starts_with(scheme))
}

#[cfg(feature = "ffmpeg")]
fn open_stream(locator: &str) -> Result<Box<dyn FrameSource>, OpenError> {
    Ok(Box::new(FfmpegSource::open(locator)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_stream(locator: &str) -> Result<Box<dyn FrameSource>, OpenError> {
    Err(OpenError::Unsupported(format!(
        "{} (视频解码需启用 ffmpeg 功能)",
        locator
    )))
}

#[cfg(feature = "ffmpeg")]
fn open_camera(index: usize) -> Result<Box<dyn FrameSource>, OpenError> {
    Ok(Box::new(FfmpegSource::open_camera(index)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_camera(index: usize) -> Result<Box<dyn FrameSource>, OpenError> {
    Err(OpenError::DeviceUnavailable(format!(
        "camera:{} (摄像头需启用 ffmpeg 功能)",
        index
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_path() {
        let err = open("videos/no-such-file.mp4").err().unwrap();
        assert!(matches!(err, OpenError::NotFound(_)));
    }

    #[test]
    fn test_open_empty_locator() {
        assert!(matches!(open("  ").err().unwrap(), OpenError::Unsupported(_)));
    }

    #[test]
    fn test_open_synthetic() {
        let mut source = open("synthetic:2").unwrap();
        assert!(matches!(source.next_frame(), Ok(SourceEvent::Frame(_))));
        assert!(matches!(source.next_frame(), Ok(SourceEvent::Frame(_))));
        assert!(matches!(source.next_frame(), Ok(SourceEvent::EndOfStream)));
    }

    #[test]
    fn test_open_bad_camera_index() {
        assert!(open("camera:front").is_err());
    }

    #[test]
    fn test_closure_opener() {
        let opener = |_: &str| -> Result<Box<dyn FrameSource>, OpenError> {
            Ok(Box::new(SyntheticSource::new(1)))
        };
        let source = opener.open("anything").unwrap();
        assert!(!source.is_closed());
    }
}
