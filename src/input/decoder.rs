// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg 解码输入
/// FFmpeg decoding source (file / RTSP / camera)
///
/// 解码在独立线程中运行, 通过过滤器把 RGB 帧送入有界通道;
/// 通道满时解码线程阻塞, 关闭时置位中止标志并丢弃接收端.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input};
use image::RgbImage;

use super::{FrameSource, SourceEvent};
use crate::error::{FrameError, OpenError};
use crate::frame::Frame;

/// 解码线程与读取端之间的缓冲帧数
const DECODE_QUEUE: usize = 4;

/// 单帧最大分辨率
const MAX_DIMENSION: u32 = 8192;

/// 超过此值的平均帧率视为无效
const MAX_FPS: f64 = 1000.0;

/// FFmpeg 中表示"无时间戳"的值
const NO_PTS: i64 = i64::MIN;

/// 码流时间信息 (探测失败时全部为 None)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct StreamTiming {
    fps: Option<f64>,
    time_base: Option<(i32, i32)>,
}

enum DecodeEvent {
    /// 解码帧与其相对首帧的显示时间
    Frame(RgbImage, Option<Duration>),
    /// 空帧/损坏帧
    Corrupt(String),
    /// 解码结束, 携带错误信息
    Ended(Option<String>),
}

/// FFmpeg解码过滤器: 任意视频 → RGB24 帧
struct RgbFrameFilter {
    tx: Sender<DecodeEvent>,
    abort: Arc<AtomicBool>,
    time_base: Option<(i32, i32)>,
    first_pts: Option<i64>,
    count: usize,
    total_frames: usize,
    dropped_frames: usize,
    last: Instant,
}

impl RgbFrameFilter {
    fn new(tx: Sender<DecodeEvent>, abort: Arc<AtomicBool>, time_base: Option<(i32, i32)>) -> Self {
        Self {
            tx,
            abort,
            time_base,
            first_pts: None,
            count: 0,
            total_frames: 0,
            dropped_frames: 0,
            last: Instant::now(),
        }
    }

    /// 按帧时间戳换算显示时间, 以首帧为零点
    fn presentation_time(&mut self, pts: i64, time_base: Option<(i32, i32)>) -> Option<Duration> {
        if pts == NO_PTS {
            return None;
        }
        let time_base = time_base.or(self.time_base)?;
        let first = *self.first_pts.get_or_insert(pts);
        pts_to_duration(pts - first, time_base)
    }

    fn drop_frame(&mut self, reason: String) -> Result<Option<AvFrame>, String> {
        self.dropped_frames += 1;
        self.tx
            .send(DecodeEvent::Corrupt(reason))
            .map_err(|_| "读取端已关闭".to_string())?;
        Ok(None)
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        log::info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        if self.abort.load(Ordering::Relaxed) {
            return Err("输入源已关闭".to_string());
        }
        self.total_frames += 1;

        let (image, pts, time_base) = unsafe {
            // 基本检查：空帧或损坏帧
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return self.drop_frame(format!("空帧/损坏帧 #{}", self.total_frames));
            }

            let w = (*frame.as_ptr()).width as u32;
            let h = (*frame.as_ptr()).height as u32;
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                return self.drop_frame(format!("非法分辨率 {}x{}", w, h));
            }

            let data = (*frame.as_ptr()).data[0];
            let stride = (*frame.as_ptr()).linesize[0] as usize;
            let row_len = w as usize * 3;
            if data.is_null() || stride < row_len {
                return self.drop_frame(format!("RGB数据异常 stride={}", stride));
            }

            // 去掉行对齐填充, 拷贝为紧凑的 RGB24
            let mut buffer = Vec::with_capacity(row_len * h as usize);
            for y in 0..h as usize {
                let row = std::slice::from_raw_parts(data.add(y * stride), row_len);
                buffer.extend_from_slice(row);
            }

            let raw = &*frame.as_ptr();
            let pts = if raw.pts != NO_PTS {
                raw.pts
            } else {
                raw.best_effort_timestamp
            };
            let time_base = rational(raw.time_base.num, raw.time_base.den).map(|_| {
                (raw.time_base.num, raw.time_base.den)
            });
            (RgbImage::from_raw(w, h, buffer), pts, time_base)
        };

        let Some(image) = image else {
            return self.drop_frame("RGB缓冲区尺寸不匹配".to_string());
        };

        self.count += 1;
        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let fps = self.count as f64 / self.last.elapsed().as_secs_f64();
            log::debug!(
                "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{}",
                fps,
                self.total_frames,
                self.dropped_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        let timestamp = self.presentation_time(pts, time_base);
        self.tx
            .send(DecodeEvent::Frame(image, timestamp))
            .map_err(|_| "读取端已关闭".to_string())?;
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        log::info!("✅ 解码线程退出");
    }
}

pub struct FfmpegSource {
    rx: Option<Receiver<DecodeEvent>>,
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    next_index: u64,
    fps: Option<f64>,
    started: Instant,
    ended: bool,
    description: String,
}

impl FfmpegSource {
    /// 打开视频文件或网络流 (RTSP 使用 TCP 传输)
    pub fn open(locator: &str) -> Result<Self, OpenError> {
        let is_rtsp = locator.starts_with("rtsp://");
        if !locator.contains("://") && !Path::new(locator).exists() {
            return Err(OpenError::NotFound(locator.into()));
        }

        // 网络流不探测 (实时流本身按采集节奏到达)
        let timing = if locator.contains("://") {
            StreamTiming::default()
        } else {
            read_stream_timing(locator)
        };

        let url = locator.to_string();
        Self::spawn(locator.to_string(), timing, move || {
            let input = Input::new(url.as_str());
            if is_rtsp {
                input.set_input_opts(
                    [
                        ("rtsp_transport", "tcp"),
                        ("buffer_size", "67108864"),
                        ("rtsp_flags", "prefer_tcp"),
                    ]
                    .into(),
                )
            } else {
                input
            }
        })
    }

    /// 打开本地摄像头 (DirectShow/AVFoundation/V4L2)
    pub fn open_camera(index: usize) -> Result<Self, OpenError> {
        let devices = ez_ffmpeg::device::get_input_video_devices()
            .map_err(|e| OpenError::DeviceUnavailable(format!("获取摄像头列表失败: {}", e)))?;
        let name = devices
            .get(index)
            .cloned()
            .ok_or_else(|| OpenError::DeviceUnavailable(format!("camera:{} 不存在", index)))?;

        let url = format_camera_url(index, &name);
        log::info!("📷 摄像头: {} ({})", name, url);

        Self::spawn(format!("camera:{}", index), StreamTiming::default(), move || {
            Input::new(url.as_str()).set_format(camera_format())
        })
    }

    fn spawn<F>(description: String, timing: StreamTiming, make_input: F) -> Result<Self, OpenError>
    where
        F: FnOnce() -> Input + Send + 'static,
    {
        let (tx, rx) = bounded(DECODE_QUEUE);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let abort = Arc::new(AtomicBool::new(false));

        let filter = RgbFrameFilter::new(tx.clone(), abort.clone(), timing.time_base);
        let thread = std::thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("rgb", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let started = FfmpegContext::builder()
                    .input(make_input())
                    .filter_descs(["format=rgb24"].into())
                    .output(out)
                    .build()
                    .map_err(|e| format!("构建失败: {}", e))
                    .and_then(|ctx| ctx.start().map_err(|e| format!("启动失败: {}", e)));

                let sch = match started {
                    Ok(sch) => {
                        let _ = ready_tx.send(Ok(()));
                        sch
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let result = sch.wait().err().map(|e| e.to_string());
                let _ = tx.send(DecodeEvent::Ended(result));
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(OpenError::Decoder(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(OpenError::Decoder("解码线程异常退出".to_string()));
            }
        }

        log::info!("🎬 FFmpeg解码启动: {}", description);
        Ok(Self {
            rx: Some(rx),
            abort,
            thread: Some(thread),
            next_index: 0,
            fps: timing.fps,
            started: Instant::now(),
            ended: false,
            description,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<SourceEvent, FrameError> {
        let Some(rx) = &self.rx else {
            return Err(FrameError::UseAfterClose);
        };
        if self.ended {
            return Ok(SourceEvent::EndOfStream);
        }

        match rx.recv() {
            Ok(DecodeEvent::Frame(image, pts)) => {
                let index = self.next_index;
                self.next_index += 1;
                // 无时间戳时按帧率推算, 实时源退回墙钟
                let timestamp = pts
                    .or_else(|| {
                        self.fps
                            .and_then(|fps| Duration::try_from_secs_f64(index as f64 / fps).ok())
                    })
                    .unwrap_or_else(|| self.started.elapsed());
                Ok(SourceEvent::Frame(Frame::new(image, index, timestamp)))
            }
            Ok(DecodeEvent::Corrupt(reason)) => Err(FrameError::TransientRead(reason)),
            Ok(DecodeEvent::Ended(Some(e))) => {
                self.ended = true;
                Err(FrameError::Fatal(e))
            }
            Ok(DecodeEvent::Ended(None)) | Err(_) => {
                self.ended = true;
                Ok(SourceEvent::EndOfStream)
            }
        }
    }

    fn close(&mut self) {
        if self.rx.is_none() {
            return;
        }
        self.abort.store(true, Ordering::Relaxed);
        // 丢弃接收端, 阻塞中的发送立即失败
        self.rx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("❌ 解码线程异常退出: {}", self.description);
            }
        }
        log::info!("🔌 输入源已关闭: {}", self.description);
    }

    fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// 探测视频流的平均帧率与时间基
fn read_stream_timing(locator: &str) -> StreamTiming {
    match find_video_stream_info(locator) {
        Ok(Some(StreamInfo::Video {
            avg_frame_rate,
            time_base,
            ..
        })) => {
            let timing = StreamTiming {
                fps: rational(avg_frame_rate.num, avg_frame_rate.den).filter(|fps| *fps <= MAX_FPS),
                time_base: rational(time_base.num, time_base.den)
                    .map(|_| (time_base.num, time_base.den)),
            };
            log::info!("🎞️ 视频流: 平均帧率 {:?}, 时间基 {:?}", timing.fps, timing.time_base);
            timing
        }
        Ok(_) => {
            log::warn!("⚠️ 未找到视频流信息: {}", locator);
            StreamTiming::default()
        }
        Err(e) => {
            log::warn!("⚠️ 视频流探测失败: {} ({})", locator, e);
            StreamTiming::default()
        }
    }
}

/// 有效的正有理数
fn rational(num: i32, den: i32) -> Option<f64> {
    (num > 0 && den > 0).then(|| num as f64 / den as f64)
}

/// 时间戳刻度数 → 时长
fn pts_to_duration(ticks: i64, (num, den): (i32, i32)) -> Option<Duration> {
    if ticks < 0 {
        return None;
    }
    Duration::try_from_secs_f64(ticks as f64 * num as f64 / den as f64).ok()
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize, name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("video={}", name)
    } else if cfg!(target_os = "linux") {
        format!("/dev/video{}", index)
    } else {
        format!("{}", index)
    }
}

fn camera_format() -> &'static str {
    if cfg!(target_os = "windows") {
        "dshow"
    } else if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "linux") {
        "v4l2"
    } else {
        "video4linux2"
    }
}
