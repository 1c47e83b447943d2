// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 推理能力以 trait 形式接入, 任何实现 `infer(frame) -> detections`
/// 的组件都可替换使用:
/// - YoloDetector:  ONNX Runtime YOLO 模型 (onnx 功能)
/// - FixedDetector: 按帧序号返回固定结果 (测试/演示)
#[cfg(feature = "onnx")]
pub mod yolo;
pub mod stub;
pub mod types;

#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;
pub use stub::FixedDetector;
pub use types::{non_max_suppression, BBox, Detection};

use std::path::Path;

use crate::config::DetectorConfig;
use crate::error::LoadError;
use crate::frame::Frame;

/// 统一的检测器接口
///
/// `infer` 是同步调用, 也是每帧开销最大的一步; 不得修改输入帧.
pub trait Detector: Send {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;

    /// 检测器名称 (日志用)
    fn name(&self) -> &str;
}

/// 模型加载器: 在 open 时把模型引用解析为检测器
pub trait DetectorLoader: Send + Sync {
    fn load(&self, model_ref: &str) -> Result<Box<dyn Detector>, LoadError>;
}

impl<F> DetectorLoader for F
where
    F: Fn(&str) -> Result<Box<dyn Detector>, LoadError> + Send + Sync,
{
    fn load(&self, model_ref: &str) -> Result<Box<dyn Detector>, LoadError> {
        self(model_ref)
    }
}

/// 默认加载器
///
/// - `stub`:   不产生任何检测结果的空检测器
/// - `*.onnx`: YOLO ONNX 模型 (需启用 onnx 功能)
#[derive(Clone, Debug, Default)]
pub struct ModelLoader {
    config: DetectorConfig,
}

impl ModelLoader {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl DetectorLoader for ModelLoader {
    fn load(&self, model_ref: &str) -> Result<Box<dyn Detector>, LoadError> {
        if model_ref == "stub" {
            log::info!("🧪 使用空检测器");
            return Ok(Box::new(FixedDetector::empty()));
        }

        let path = Path::new(model_ref);
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("onnx") => load_onnx(path, &self.config),
            _ => Err(LoadError::Incompatible(format!(
                "无法识别的模型格式: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, config: &DetectorConfig) -> Result<Box<dyn Detector>, LoadError> {
    let detector = YoloDetector::load(path, config)?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_path: &Path, _config: &DetectorConfig) -> Result<Box<dyn Detector>, LoadError> {
    Err(LoadError::BackendUnavailable("onnx"))
}
