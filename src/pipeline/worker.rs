// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 工作线程: 读帧 → 推理 → 标注 → 交付

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use super::handoff::{EndReason, FrameSender, SendOutcome};
use super::{PipelineState, Shared};
use crate::annotate::Annotator;
use crate::detection::Detector;
use crate::error::FrameError;
use crate::input::{FrameSource, SourceEvent};

/// 输入源守卫: 任何退出路径 (含 panic) 都只关闭一次
pub(crate) struct SourceGuard {
    source: Box<dyn FrameSource>,
    released: bool,
}

impl SourceGuard {
    pub(crate) fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub(crate) fn source(&mut self) -> &mut dyn FrameSource {
        self.source.as_mut()
    }

    pub(crate) fn frame_rate(&self) -> Option<f64> {
        self.source.frame_rate()
    }

    pub(crate) fn describe(&self) -> &str {
        self.source.describe()
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.source.close();
        log::info!("🔌 输入源已释放: {}", self.source.describe());
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum Wait {
    Ready,
    Stopped,
}

pub(crate) struct Worker {
    pub(crate) session: u64,
    pub(crate) shared: Arc<Shared>,
    pub(crate) source: SourceGuard,
    pub(crate) detector: Box<dyn Detector>,
    pub(crate) annotator: Arc<Annotator>,
    pub(crate) sender: FrameSender,
    pub(crate) max_failures: u32,
    /// 按源帧率交付时的帧间隔
    pub(crate) frame_interval: Option<Duration>,
}

impl Worker {
    pub(crate) fn run(mut self) {
        log::info!(
            "🚀 工作线程启动 (会话{}): {} | 检测器: {}",
            self.session,
            self.source.describe(),
            self.detector.name()
        );

        let reason = match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
            Ok(reason) => reason,
            Err(_) => {
                log::error!("❌ 工作线程异常退出 (会话{})", self.session);
                EndReason::Failed("工作线程异常".to_string())
            }
        };

        self.source.release();
        self.finish(reason);
    }

    fn run_loop(&mut self) -> EndReason {
        let mut failures: u32 = 0;
        let mut last_sent: Option<Instant> = None;

        // 统计
        let mut count = 0u64;
        let mut last = Instant::now();

        loop {
            if let Wait::Stopped = self.wait_ready(None) {
                return EndReason::Closed;
            }

            let frame = match self.source.source().next_frame() {
                Ok(SourceEvent::Frame(frame)) => frame,
                Ok(SourceEvent::EndOfStream) => return EndReason::Exhausted,
                Err(FrameError::TransientRead(e)) => {
                    self.shared.stats.read_failed();
                    failures += 1;
                    log::warn!("⚠️ 跳过帧: {} (连续失败{}次)", e, failures);
                    if failures > self.max_failures {
                        log::error!("❌ 连续失败超过{}次, 结束会话", self.max_failures);
                        return EndReason::TooManyFailures;
                    }
                    continue;
                }
                Err(FrameError::UseAfterClose) => return EndReason::Closed,
                Err(FrameError::Fatal(e)) => {
                    log::error!("❌ 输入源错误: {}", e);
                    return EndReason::Failed(e);
                }
            };
            self.shared.stats.frame_read();

            // 读帧期间可能已收到 close, 不再为该帧推理
            if self.stop_requested() {
                return EndReason::Closed;
            }

            let output = match self.detector.infer(&frame) {
                Ok(detections) => {
                    failures = 0;
                    self.annotator.annotate(&frame, &detections)
                }
                Err(e) => {
                    self.shared.stats.inference_failed();
                    failures += 1;
                    log::warn!("⚠️ 帧#{} 推理失败, 原样交付: {}", frame.index(), e);
                    frame
                }
            };

            // 暂停期间完成的帧保留到恢复后交付, close 时丢弃
            let deadline = self.frame_interval.zip(last_sent).map(|(i, t)| t + i);
            if let Wait::Stopped = self.wait_ready(deadline) {
                return EndReason::Closed;
            }

            match self.sender.send(output) {
                SendOutcome::Delivered { evicted } => {
                    self.shared.stats.frame_delivered();
                    if evicted > 0 {
                        self.shared.stats.frames_dropped(evicted);
                    }
                }
                SendOutcome::Cancelled => return EndReason::Closed,
            }
            last_sent = Some(Instant::now());

            count += 1;
            if last.elapsed().as_secs() >= 1 {
                let fps = count as f64 / last.elapsed().as_secs_f64();
                let stats = self.shared.stats.snapshot();
                log::debug!(
                    "🎬 交付: {:.1}fps | 读取{} 交付{} 丢弃{}",
                    fps,
                    stats.frames_read,
                    stats.frames_delivered,
                    stats.frames_dropped
                );
                count = 0;
                last = Instant::now();
            }

            if failures > self.max_failures {
                log::error!("❌ 连续失败超过{}次, 结束会话", self.max_failures);
                return EndReason::TooManyFailures;
            }
        }
    }

    fn stop_requested(&self) -> bool {
        let ctl = self.shared.lock();
        ctl.stop || ctl.session != self.session
    }

    /// 暂停时在条件变量上等待; 给定截止时间时等到该时刻
    fn wait_ready(&self, deadline: Option<Instant>) -> Wait {
        let mut ctl = self.shared.lock();
        loop {
            if ctl.stop || ctl.session != self.session {
                return Wait::Stopped;
            }
            if ctl.state == PipelineState::Paused {
                ctl = self
                    .shared
                    .wake
                    .wait(ctl)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let Some(deadline) = deadline else {
                return Wait::Ready;
            };
            let now = Instant::now();
            if now >= deadline {
                return Wait::Ready;
            }
            ctl = self
                .shared
                .wake
                .wait_timeout(ctl, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn finish(&self, reason: EndReason) {
        {
            let mut ctl = self.shared.lock();
            if !ctl.stop && ctl.session == self.session {
                ctl.state = PipelineState::Stopped;
            }
        }

        let stats = self.shared.stats.snapshot();
        log::info!(
            "🏁 会话{}结束: {:?} | 读取{} 交付{} 丢弃{} 读帧失败{} 推理失败{}",
            self.session,
            reason,
            stats.frames_read,
            stats.frames_delivered,
            stats.frames_dropped,
            stats.read_failures,
            stats.inference_failures
        );
        self.sender.end(reason);
    }
}
