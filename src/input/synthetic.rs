// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 合成输入源: 生成固定数量的纯色帧, 可注入读帧失败

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{FrameSource, SourceEvent};
use crate::error::{FrameError, OpenError};
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    total: u64,
    next: u64,
    fps: Option<f64>,
    read_delay: Option<Duration>,
    /// 这些位置的读取返回 TransientRead (该帧被跳过)
    transient_failures: HashSet<u64>,
    /// 从该位置起每次读取都失败
    fail_from: Option<u64>,
    closed: bool,
    close_count: Arc<AtomicUsize>,
    description: String,
}

impl SyntheticSource {
    pub fn new(total: u64) -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            total,
            next: 0,
            fps: None,
            read_delay: None,
            transient_failures: HashSet::new(),
            fail_from: None,
            closed: false,
            close_count: Arc::new(AtomicUsize::new(0)),
            description: format!("synthetic:{}", total),
        }
    }

    /// 解析 `<n>` 或 `<n>:<w>x<h>`
    pub fn parse(params: &str) -> Result<Self, OpenError> {
        let invalid = || OpenError::Unsupported(format!("合成输入格式无效: synthetic:{}", params));

        let (count, size) = match params.split_once(':') {
            Some((count, size)) => (count, Some(size)),
            None => (params, None),
        };
        let total: u64 = count.parse().map_err(|_| invalid())?;
        let mut source = Self::new(total);

        if let Some(size) = size {
            let (w, h) = size.split_once('x').ok_or_else(invalid)?;
            let w: u32 = w.parse().map_err(|_| invalid())?;
            let h: u32 = h.parse().map_err(|_| invalid())?;
            if w == 0 || h == 0 {
                return Err(invalid());
            }
            source = source.with_size(w, h);
        }
        Ok(source)
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self.description = format!("synthetic:{}:{}x{}", self.total, width, height);
        self
    }

    /// 报告帧率 (启用节奏控制时按此交付)
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    /// 每次读帧前的模拟延迟
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn with_transient_failures(mut self, positions: impl IntoIterator<Item = u64>) -> Self {
        self.transient_failures.extend(positions);
        self
    }

    pub fn failing_from(mut self, position: u64) -> Self {
        self.fail_from = Some(position);
        self
    }

    /// 共享关闭计数器 (测试用: 检查资源只释放一次)
    pub fn with_close_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.close_count = counter;
        self
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// 第 `index` 帧的颜色 (不含纯红, 便于检测标注)
    pub fn color_of(index: u64) -> [u8; 3] {
        [((index * 8) % 128) as u8, 96, 160]
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<SourceEvent, FrameError> {
        if self.closed {
            return Err(FrameError::UseAfterClose);
        }
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }

        let position = self.next;
        if self.fail_from.is_some_and(|from| position >= from) {
            return Err(FrameError::TransientRead(format!("模拟读帧失败 #{}", position)));
        }
        if position >= self.total {
            return Ok(SourceEvent::EndOfStream);
        }

        self.next += 1;
        if self.transient_failures.contains(&position) {
            return Err(FrameError::TransientRead(format!("模拟读帧失败 #{}", position)));
        }

        let mut frame = Frame::filled(self.width, self.height, Self::color_of(position), position);
        if let Some(fps) = self.fps.filter(|f| *f > 0.0) {
            frame = Frame::new(
                frame.image().clone(),
                position,
                Duration::from_secs_f64(position as f64 / fps),
            );
        }
        Ok(SourceEvent::Frame(frame))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_index(source: &mut SyntheticSource) -> Option<u64> {
        match source.next_frame() {
            Ok(SourceEvent::Frame(frame)) => Some(frame.index()),
            _ => None,
        }
    }

    #[test]
    fn test_frames_then_end() {
        let mut source = SyntheticSource::new(3);
        assert_eq!(next_index(&mut source), Some(0));
        assert_eq!(next_index(&mut source), Some(1));
        assert_eq!(next_index(&mut source), Some(2));
        assert!(matches!(source.next_frame(), Ok(SourceEvent::EndOfStream)));
        assert!(matches!(source.next_frame(), Ok(SourceEvent::EndOfStream)));
    }

    #[test]
    fn test_transient_failure_skips_frame() {
        let mut source = SyntheticSource::new(3).with_transient_failures([1]);
        assert_eq!(next_index(&mut source), Some(0));
        assert!(matches!(source.next_frame(), Err(FrameError::TransientRead(_))));
        assert_eq!(next_index(&mut source), Some(2));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut source = SyntheticSource::new(3);
        source.close();
        source.close();
        assert_eq!(source.close_count(), 1);
        assert!(matches!(source.next_frame(), Err(FrameError::UseAfterClose)));
    }

    #[test]
    fn test_parse() {
        let source = SyntheticSource::parse("5:320x240").unwrap();
        assert_eq!((source.width, source.height, source.total), (320, 240, 5));
        assert!(SyntheticSource::parse("five").is_err());
        assert!(SyntheticSource::parse("5:0x10").is_err());
    }

    #[test]
    fn test_timestamps_follow_frame_rate() {
        let mut source = SyntheticSource::new(3).with_frame_rate(10.0);
        source.next_frame().unwrap();
        match source.next_frame().unwrap() {
            SourceEvent::Frame(frame) => assert_eq!(frame.timestamp(), Duration::from_millis(100)),
            SourceEvent::EndOfStream => panic!("unexpected end"),
        }
    }
}
