// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLO ONNX 检测器
// 包含: 模型加载、预处理、推理、后处理

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use fast_image_resize as fr;
use ndarray::{s, Array, Axis, IxDyn};
use ort::{GraphOptimizationLevel, Session};
use regex::Regex;

use super::{non_max_suppression, BBox, Detection, Detector};
use crate::config::DetectorConfig;
use crate::error::LoadError;
use crate::frame::Frame;

/// letterbox 填充值
const PAD_VALUE: f32 = 114.0 / 255.0;

/// 输出张量布局
#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputLayout {
    /// YOLOv8/v11: [cx, cy, w, h, cls...]
    Anchorless,
    /// YOLOv5: [cx, cy, w, h, obj, cls...]
    Objectness,
}

pub struct YoloDetector {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: u32,
    conf: f32,
    iou: f32,
    names: Vec<String>,
    resizer: fr::Resizer,

    // 统计
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl YoloDetector {
    /// 加载模型; 类别名优先取配置, 否则读取模型元数据中的 `names`
    pub fn load(path: &Path, config: &DetectorConfig) -> Result<Self, LoadError> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| LoadError::Incompatible(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| LoadError::Incompatible("模型没有输入".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| LoadError::Incompatible("模型没有输出".to_string()))?;

        let names = match &config.class_names {
            Some(names) => names.clone(),
            None => session
                .metadata()
                .ok()
                .and_then(|m| m.custom("names").ok().flatten())
                .map(|raw| parse_class_names(&raw))
                .unwrap_or_default(),
        };
        if names.is_empty() {
            return Err(LoadError::Incompatible(
                "模型未携带类别名称, 请在配置中指定 class_names".to_string(),
            ));
        }

        log::info!(
            "✅ YOLO 检测模型加载成功: {} ({}类, 输入{}x{})",
            path.display(),
            names.len(),
            config.input_size,
            config.input_size
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            input_size: config.input_size,
            conf: config.conf_threshold,
            iou: config.iou_threshold,
            names,
            resizer: fr::Resizer::new(),
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, u32, u32) {
        let size = self.input_size as f32;
        let r = (size / w0).min(size / h0);
        let w = ((w0 * r).round() as u32).clamp(1, self.input_size);
        let h = ((h0 * r).round() as u32).clamp(1, self.input_size);
        (r, w, h)
    }

    /// 预处理: 等比缩放到左上角, 其余区域填充
    fn preprocess(&mut self, frame: &Frame) -> Result<(Array<f32, IxDyn>, f32)> {
        let (ratio, w_new, h_new) = self.scale_wh(frame.width() as f32, frame.height() as f32);

        let src_image = fr::images::Image::from_vec_u8(
            frame.width(),
            frame.height(),
            frame.as_raw().to_vec(),
            fr::PixelType::U8x3,
        )?;
        let mut dst_image = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer.resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        let size = self.input_size as usize;
        let mut ys = Array::from_elem((1, 3, size, size), PAD_VALUE).into_dyn();
        for (i, rgb) in dst_image.buffer().chunks_exact(3).enumerate() {
            let x = i % w_new as usize;
            let y = i / w_new as usize;
            ys[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
            ys[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
            ys[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
        }

        Ok((ys, ratio))
    }

    fn postprocess(
        &self,
        output: Array<f32, IxDyn>,
        ratio: f32,
        width: f32,
        height: f32,
    ) -> Result<Vec<Detection>> {
        if output.ndim() != 3 {
            return Err(anyhow!("输出维度异常: {:?}", output.shape()));
        }
        let preds = output.index_axis(Axis(0), 0);
        // [attrs, N] 转为 [N, attrs]
        let preds = if preds.shape()[0] < preds.shape()[1] {
            preds.reversed_axes()
        } else {
            preds
        };

        let nc = self.names.len();
        let attrs = preds.shape()[1];
        let layout = if attrs == nc + 4 {
            OutputLayout::Anchorless
        } else if attrs == nc + 5 {
            OutputLayout::Objectness
        } else {
            return Err(anyhow!("输出属性数{}与类别数{}不匹配", attrs, nc));
        };

        let mut data = Vec::new();
        for pred in preds.axis_iter(Axis(0)) {
            let (objectness, clss) = match layout {
                OutputLayout::Anchorless => (1.0, pred.slice(s![4..])),
                OutputLayout::Objectness => (pred[4], pred.slice(s![5..])),
            };

            let Some((id, score)) = clss
                .iter()
                .copied()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };

            let confidence = score * objectness;
            if confidence < self.conf {
                continue;
            }

            let cx = pred[0] / ratio;
            let cy = pred[1] / ratio;
            let w = pred[2] / ratio;
            let h = pred[3] / ratio;
            let bbox = BBox::from_xywh(cx - w / 2., cy - h / 2., w, h).clamp_to(width, height);

            data.push(Detection::new(self.names[id].clone(), bbox, confidence));
        }

        non_max_suppression(&mut data, self.iou);
        Ok(data)
    }
}

impl Detector for YoloDetector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let start = Instant::now();
        let (input, ratio) = self.preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .into_owned();

        let detections =
            self.postprocess(output, ratio, frame.width() as f32, frame.height() as f32)?;

        // 更新统计
        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last).as_secs() >= 1 {
            self.current_fps = self.count as f64 / now.duration_since(self.last).as_secs_f64();
            log::debug!(
                "🎯 检测: {}个目标 | {:.1}ms/帧 | {:.1}fps",
                detections.len(),
                start.elapsed().as_secs_f64() * 1000.0,
                self.current_fps
            );
            self.count = 0;
            self.last = now;
        }

        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolo-onnx"
    }
}

/// 解析 ultralytics 导出的类别字典: `{0: 'person', 1: 'bicycle'}`
pub fn parse_class_names(raw: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(\d+):\s*['"]([^'"]*)['"]"#) else {
        return Vec::new();
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|cap| Some((cap[1].parse().ok()?, cap[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);
    pairs.into_iter().map(|(_, name)| name).collect()
}
