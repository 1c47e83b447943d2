// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频处理流水线 (Video Processing Pipeline)
///
/// 双线程架构:
/// - 命令线程: 调用 PlaybackController 的 open/pause/resume/close
/// - 工作线程: 读帧 → 推理 → 标注 → 交付 (每个会话一个)
///
/// 显示端通过 FrameReceiver 在自己的线程上取帧.
pub mod handoff;
pub mod stats;
mod worker;

pub use handoff::{DisplaySink, EndReason, FrameReceiver, PipelineEvent};
pub use stats::StatsSnapshot;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use crate::annotate::Annotator;
use crate::config::PipelineConfig;
use crate::detection::{DetectorLoader, ModelLoader};
use crate::error::ControlError;
use crate::input::{DefaultSourceOpener, SourceOpener};
use handoff::Handoff;
use stats::PipelineStats;
use worker::{SourceGuard, Worker};

/// 播放状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
    Paused,
}

pub(crate) struct ControlState {
    pub(crate) state: PipelineState,
    /// 当前会话需要结束
    pub(crate) stop: bool,
    pub(crate) session: u64,
}

/// 命令线程与工作线程共享的状态
pub(crate) struct Shared {
    control: Mutex<ControlState>,
    pub(crate) wake: Condvar,
    pub(crate) stats: PipelineStats,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 只由持有生命周期锁的一方修改
#[derive(Default)]
struct Lifecycle {
    worker: Option<JoinHandle<()>>,
    /// 丢弃即取消阻塞中的交付
    cancel: Option<Sender<()>>,
}

/// 播放控制器
///
/// | 命令   | 起始状态        | 结果状态 |
/// |--------|-----------------|----------|
/// | open   | Stopped         | Running  |
/// | pause  | Running         | Paused   |
/// | resume | Paused          | Running  |
/// | close  | Running/Paused  | Stopped  |
///
/// 输入源读完时工作线程自行转入 Stopped.
pub struct PlaybackController {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    handoff: Handoff,
    opener: Box<dyn SourceOpener>,
    loader: Box<dyn DetectorLoader>,
    annotator: Arc<Annotator>,
    config: PipelineConfig,
}

impl PlaybackController {
    /// 使用默认输入源与模型加载器
    pub fn new(config: PipelineConfig, annotator: Annotator) -> (Self, FrameReceiver) {
        let loader = ModelLoader::new(config.detector.clone());
        Self::with_backends(config, annotator, DefaultSourceOpener, loader)
    }

    /// 指定输入源打开器与模型加载器
    pub fn with_backends(
        config: PipelineConfig,
        annotator: Annotator,
        opener: impl SourceOpener + 'static,
        loader: impl DetectorLoader + 'static,
    ) -> (Self, FrameReceiver) {
        let (handoff, receiver) = handoff::channel(config.handoff.clone());
        let shared = Arc::new(Shared {
            control: Mutex::new(ControlState {
                state: PipelineState::Stopped,
                stop: false,
                session: 0,
            }),
            wake: Condvar::new(),
            stats: PipelineStats::default(),
        });

        let controller = Self {
            shared,
            lifecycle: Mutex::new(Lifecycle::default()),
            handoff,
            opener: Box::new(opener),
            loader: Box::new(loader),
            annotator: Arc::new(annotator),
            config,
        };
        (controller, receiver)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// 当前 (或最近一次) 会话号, 从1开始
    pub fn session(&self) -> u64 {
        self.shared.lock().session
    }

    /// 是否有尚未回收的工作线程在运行
    pub fn has_worker(&self) -> bool {
        self.lifecycle()
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// 打开输入源与模型并启动工作线程
    ///
    /// 任一步失败都保持 Stopped, 已打开的输入源会被关闭.
    pub fn open(&self, locator: &str, model_ref: &str) -> Result<(), ControlError> {
        let mut lifecycle = self.lifecycle();
        if self.state() != PipelineState::Stopped {
            return Err(ControlError::AlreadyOpen);
        }
        reap(&mut lifecycle);

        let source = SourceGuard::new(self.opener.open(locator).map_err(|e| {
            log::error!("❌ 输入源打开失败: {}", e);
            e
        })?);
        let detector = self.loader.load(model_ref).map_err(|e| {
            log::error!("❌ 模型加载失败: {}", e);
            e
        })?;

        let frame_interval = if self.config.pace_to_source {
            self.config
                .source_fps
                .or_else(|| source.frame_rate())
                .and_then(frame_interval)
        } else {
            None
        };

        let session = {
            let mut ctl = self.shared.lock();
            ctl.session += 1;
            ctl.stop = false;
            ctl.state = PipelineState::Running;
            ctl.session
        };
        self.shared.stats.reset();

        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let worker = Worker {
            session,
            shared: self.shared.clone(),
            source,
            detector,
            annotator: self.annotator.clone(),
            sender: self.handoff.sender(session, cancel_rx),
            max_failures: self.config.max_consecutive_failures,
            frame_interval,
        };

        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{}", session))
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.lock().state = PipelineState::Stopped;
                log::error!("❌ 工作线程启动失败: {}", e);
                ControlError::Spawn(e)
            })?;

        lifecycle.worker = Some(handle);
        lifecycle.cancel = Some(cancel_tx);
        log::info!("▶️ 会话{}已打开: {}", session, locator);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        let mut ctl = self.shared.lock();
        match ctl.state {
            PipelineState::Stopped => Err(ControlError::NotOpen),
            PipelineState::Paused => Ok(()),
            PipelineState::Running => {
                ctl.state = PipelineState::Paused;
                self.shared.wake.notify_all();
                log::info!("⏸️ 已暂停 (会话{})", ctl.session);
                Ok(())
            }
        }
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        let mut ctl = self.shared.lock();
        match ctl.state {
            PipelineState::Stopped => Err(ControlError::NotOpen),
            PipelineState::Running => Ok(()),
            PipelineState::Paused => {
                ctl.state = PipelineState::Running;
                self.shared.wake.notify_all();
                log::info!("▶️ 已恢复 (会话{})", ctl.session);
                Ok(())
            }
        }
    }

    /// 结束会话: 通知工作线程, 等待其退出并释放输入源
    ///
    /// 并发调用时只有一方生效, 另一方在其完成后得到 `NotOpen`.
    pub fn close(&self) -> Result<(), ControlError> {
        let mut lifecycle = self.lifecycle();
        let session = {
            let mut ctl = self.shared.lock();
            if ctl.state == PipelineState::Stopped {
                drop(ctl);
                reap(&mut lifecycle);
                return Err(ControlError::NotOpen);
            }
            ctl.stop = true;
            self.shared.wake.notify_all();
            ctl.session
        };

        drop(lifecycle.cancel.take());
        reap(&mut lifecycle);

        self.shared.lock().state = PipelineState::Stopped;
        let purged = self.handoff.purge();
        if purged > 0 {
            self.shared.stats.frames_dropped(purged);
        }
        log::info!("⏹️ 会话{}已关闭", session);
        Ok(())
    }
}

/// 帧率 → 交付间隔, 无法表示的帧率忽略 (不做节奏控制)
fn frame_interval(fps: f64) -> Option<Duration> {
    if fps.is_nan() || fps <= 0.0 {
        return None;
    }
    match Duration::try_from_secs_f64(1.0 / fps) {
        Ok(interval) => Some(interval),
        Err(e) => {
            log::warn!("⚠️ 帧率 {} 无效 ({}), 不做节奏控制", fps, e);
            None
        }
    }
}

/// 回收已结束 (或即将结束) 的工作线程
fn reap(lifecycle: &mut Lifecycle) {
    lifecycle.cancel = None;
    if let Some(worker) = lifecycle.worker.take() {
        if worker.join().is_err() {
            log::error!("❌ 工作线程异常退出");
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
