// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线配置 - 通过JSON文件调整参数

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::annotate::LabelStyle;

/// 跨线程交付策略 (显示端跟不上时的处理方式)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HandoffPolicy {
    /// 单槽位: 未取走的旧帧被最新帧替换
    DropToLatest,
    /// 有界阻塞队列: 不丢帧, 队列满时工作线程等待 (可被close打断)
    Lossless { capacity: usize },
}

impl Default for HandoffPolicy {
    fn default() -> Self {
        HandoffPolicy::DropToLatest
    }
}

/// 默认标签字体 (微软雅黑, 需自行放置); 缺失时使用内置字体
pub const DEFAULT_FONT: &str = "assets/font/msyh.ttc";

/// 标注绘制参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub stroke_width: u32,            // 检测框线宽(像素)
    pub font_path: Option<PathBuf>,   // 标签字体 (需支持中文)
    pub font_size: f32,               // 标签字号
    pub fallback_color: [u8; 3],      // 未映射类别的颜色
    pub labels: BTreeMap<String, LabelStyle>, // 类别 → 显示文字/颜色
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("Head".to_string(), LabelStyle::new("未佩戴头盔", [255, 0, 0]));
        labels.insert("Helmet".to_string(), LabelStyle::new("头盔", [0, 255, 0]));
        labels.insert("Person".to_string(), LabelStyle::new("人类", [0, 0, 255]));

        Self {
            stroke_width: 2,
            font_path: Some(PathBuf::from(DEFAULT_FONT)),
            font_size: 24.0,
            fallback_color: [255, 255, 255],
            labels,
        }
    }
}

/// 检测模型参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub conf_threshold: f32,              // 置信度阈值
    pub iou_threshold: f32,               // NMS IOU阈值
    pub input_size: u32,                  // 推理输入尺寸
    pub class_names: Option<Vec<String>>, // 模型未携带类别名时使用
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            class_names: None,
        }
    }
}

/// 流水线参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 容错 ===
    pub max_consecutive_failures: u32, // 连续读帧/推理失败上限, 超过即结束会话

    // === 交付 ===
    pub handoff: HandoffPolicy,

    // === 节奏 ===
    pub pace_to_source: bool,     // 按源帧率交付
    pub source_fps: Option<f64>, // 源未报告帧率时的覆盖值

    pub annotation: AnnotationConfig,
    pub detector: DetectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 30,
            handoff: HandoffPolicy::default(),
            pace_to_source: true,
            source_fps: None,
            annotation: AnnotationConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    log::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    log::error!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        log::info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        log::info!("🎛️  当前流水线配置:");
        log::info!("  交付策略: {:?}", self.handoff);
        log::info!("  连续失败上限: {}", self.max_consecutive_failures);
        log::info!("  按源帧率交付: {}", self.pace_to_source);
        log::info!(
            "  检测阈值: conf={:.2} iou={:.2}",
            self.detector.conf_threshold,
            self.detector.iou_threshold
        );
        log::info!("  标签映射: {}个类别", self.annotation.labels.len());
    }
}
