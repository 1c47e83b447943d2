#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotate; // 标注绘制
pub mod config; // 流水线配置参数
pub mod detection; // 智能检测系统
pub mod error; // 错误类型
pub mod frame; // 视频帧
pub mod input; // 视频输入系统
pub mod pipeline; // 播放控制与帧交付

pub use crate::annotate::{Annotator, LabelStyle, StyleMap};
pub use crate::config::{AnnotationConfig, DetectorConfig, HandoffPolicy, PipelineConfig};
pub use crate::detection::{BBox, Detection, Detector, DetectorLoader, ModelLoader};
pub use crate::error::{ControlError, FrameError, LoadError, OpenError};
pub use crate::frame::{Frame, PixelFormat};
pub use crate::input::{FrameSource, SourceEvent, SourceOpener};
pub use crate::pipeline::{
    DisplaySink, EndReason, FrameReceiver, PipelineEvent, PipelineState, PlaybackController,
    StatsSnapshot,
};
