// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 固定结果检测器 (测试替身)

use std::collections::HashMap;

use super::{Detection, Detector};
use crate::frame::Frame;

/// 按帧序号返回预设检测结果, 未登记的帧返回空列表
#[derive(Clone, Debug, Default)]
pub struct FixedDetector {
    by_index: HashMap<u64, Vec<Detection>>,
    calls: u64,
}

impl FixedDetector {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 为指定帧登记检测结果
    pub fn with_frame(mut self, index: u64, detections: Vec<Detection>) -> Self {
        self.by_index.insert(index, detections);
        self
    }

    /// 已执行的推理次数
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Detector for FixedDetector {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self
            .by_index
            .get(&frame.index())
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
