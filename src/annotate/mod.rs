// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 标注绘制 (Annotation)
//!
//! 纯函数: 帧 + 检测结果 + 样式映射 → 新帧
//! - 检测框: 固定线宽的空心矩形 (向框内收缩, 不越界)
//! - 标签:   类别色底板 + "{文字} {置信度:.2}", 位于框上沿之上,
//!           靠近画面边缘时移入画面内; 文字超出底板的部分被裁掉
pub mod style;

pub use style::{LabelStyle, ResolvedStyle, StyleMap};

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::AnnotationConfig;
use crate::detection::Detection;
use crate::frame::Frame;

/// 标签文字与底板边缘的间距
const LABEL_PADDING: u32 = 2;

/// 内置字体 (DejaVu Sans: 拉丁/希腊/西里尔字母, 不含中文字形)
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/font/DejaVuSans.ttf");

/// 像素矩形 (闭区间左上角 + 尺寸)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && x < self.x + self.width as i32
            && y < self.y + self.height as i32
    }

    /// 是否落在宽度为 `stroke` 的内边框上
    pub fn on_border(&self, x: i32, y: i32, stroke: u32) -> bool {
        if !self.contains(x, y) {
            return false;
        }
        let s = stroke as i32;
        x < self.x + s
            || y < self.y + s
            || x >= self.x + self.width as i32 - s
            || y >= self.y + self.height as i32 - s
    }

    fn to_rect(self) -> Rect {
        Rect::at(self.x, self.y).of_size(self.width, self.height)
    }
}

/// 单个检测结果的绘制位置
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationLayout {
    /// 检测框 (完全在画面外时为 None)
    pub box_rect: Option<PixelRect>,
    pub label_rect: Option<PixelRect>,
    pub text: String,
    pub color: [u8; 3],
}

pub struct Annotator {
    styles: StyleMap,
    font: Option<FontArc>,
    font_size: f32,
    stroke_width: u32,
}

impl Annotator {
    pub fn new(styles: StyleMap) -> Self {
        Self {
            styles,
            font: None,
            font_size: 24.0,
            stroke_width: 2,
        }
    }

    /// 按配置构建
    ///
    /// 配置的字体缺失或无法解析时退回内置字体.
    pub fn from_config(config: &AnnotationConfig) -> Result<Self> {
        let configured = config.font_path.as_deref().and_then(|path| match load_font(path) {
            Ok(font) => {
                log::info!("✅ 标签字体加载成功: {}", path.display());
                Some(font)
            }
            Err(e) => {
                log::warn!("⚠️ {:#}, 改用内置字体 (中文标签将显示为方框)", e);
                None
            }
        });
        let font = match configured {
            Some(font) => font,
            None => bundled_font()?,
        };

        Ok(Self::new(StyleMap::from_config(config))
            .with_stroke_width(config.stroke_width)
            .with_font_size(config.font_size)
            .with_font(font))
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size.max(1.0);
        self
    }

    pub fn with_stroke_width(mut self, stroke_width: u32) -> Self {
        self.stroke_width = stroke_width.max(1);
        self
    }

    pub fn stroke_width(&self) -> u32 {
        self.stroke_width
    }

    /// 计算检测结果在给定画面尺寸下的绘制位置
    pub fn layout(&self, width: u32, height: u32, detection: &Detection) -> AnnotationLayout {
        let style = self.styles.resolve(&detection.class_name);
        let text = format!("{} {:.2}", style.text, detection.confidence);

        let box_rect = box_rect(width, height, detection);
        let label_rect = box_rect.map(|b| self.label_rect(width, height, b, &text));

        AnnotationLayout {
            box_rect,
            label_rect,
            text,
            color: style.color,
        }
    }

    /// 把检测结果绘制到帧副本上, 输入帧保持不变
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        if detections.is_empty() {
            return frame.clone();
        }

        let mut canvas: RgbImage = frame.image().clone();
        for detection in detections {
            let layout = self.layout(frame.width(), frame.height(), detection);
            self.draw(&mut canvas, &layout);
        }
        frame.with_image(canvas)
    }

    fn draw(&self, canvas: &mut RgbImage, layout: &AnnotationLayout) {
        let Some(b) = layout.box_rect else {
            return;
        };
        let color = Rgb(layout.color);

        // 线宽通过逐层内缩的空心矩形实现
        for i in 0..self.stroke_width {
            let inset = i as i32;
            let w = b.width.saturating_sub(2 * i);
            let h = b.height.saturating_sub(2 * i);
            if w == 0 || h == 0 {
                break;
            }
            let ring = PixelRect {
                x: b.x + inset,
                y: b.y + inset,
                width: w,
                height: h,
            };
            draw_hollow_rect_mut(canvas, ring.to_rect(), color);
        }

        if let Some(label) = layout.label_rect {
            // 文字画在独立底板上再贴回, 不会溢出底板
            let mut plate = RgbImage::from_pixel(label.width, label.height, color);
            if let Some(font) = &self.font {
                draw_text_mut(
                    &mut plate,
                    Rgb(text_color(layout.color)),
                    LABEL_PADDING as i32,
                    LABEL_PADDING as i32,
                    PxScale::from(self.font_size),
                    font,
                    &layout.text,
                );
            }
            imageops::replace(canvas, &plate, label.x as i64, label.y as i64);
        }
    }

    fn text_extent(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(PxScale::from(self.font_size), font, text),
            // 无字体时按等宽字符估算
            None => (
                (text.chars().count() as f32 * self.font_size * 0.6).ceil() as u32,
                self.font_size.ceil() as u32,
            ),
        }
    }

    fn label_rect(&self, width: u32, height: u32, b: PixelRect, text: &str) -> PixelRect {
        let (tw, th) = self.text_extent(text);
        let plate_w = (tw + 2 * LABEL_PADDING).clamp(1, width);
        let plate_h = (th + 2 * LABEL_PADDING).clamp(1, height);

        let max_x = (width - plate_w) as i32;
        let max_y = (height - plate_h) as i32;

        let x = b.x.min(max_x).max(0);
        // 优先放在框上沿之上, 空间不足时放到框内上沿
        let above = b.y - plate_h as i32;
        let y = if above >= 0 { above } else { b.y.min(max_y).max(0) };

        PixelRect {
            x,
            y,
            width: plate_w,
            height: plate_h,
        }
    }
}

/// 检测框对应的像素矩形, 超出画面的部分被裁剪
fn box_rect(width: u32, height: u32, detection: &Detection) -> Option<PixelRect> {
    if width == 0 || height == 0 {
        return None;
    }
    let bbox = &detection.bbox;
    let (w, h) = (width as f32, height as f32);
    if bbox.x2 < 0.0 || bbox.y2 < 0.0 || bbox.x1 >= w || bbox.y1 >= h {
        return None;
    }

    let left = bbox.x1.round().clamp(0.0, w - 1.0) as i32;
    let top = bbox.y1.round().clamp(0.0, h - 1.0) as i32;
    let right = bbox.x2.round().clamp(0.0, w - 1.0) as i32;
    let bottom = bbox.y2.round().clamp(0.0, h - 1.0) as i32;
    if right < left || bottom < top {
        return None;
    }

    Some(PixelRect {
        x: left,
        y: top,
        width: (right - left + 1) as u32,
        height: (bottom - top + 1) as u32,
    })
}

/// 按底板亮度选择黑/白文字
fn text_color(plate: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = plate;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 140.0 {
        [0, 0, 0]
    } else {
        [255, 255, 255]
    }
}

/// 内置标签字体
pub fn bundled_font() -> Result<FontArc> {
    FontArc::try_from_slice(BUNDLED_FONT).context("内置字体解析失败")
}

/// 加载标签字体 (ttf/otf/ttc)
pub fn load_font(path: &Path) -> Result<FontArc> {
    let bytes =
        std::fs::read(path).with_context(|| format!("未找到字体文件: {}", path.display()))?;
    FontArc::try_from_vec(bytes).with_context(|| format!("字体解析失败: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    fn red_a() -> StyleMap {
        StyleMap::default().with_style("A", LabelStyle::new("Alpha", [255, 0, 0]))
    }

    #[test]
    fn test_box_outline_drawn() {
        let annotator = Annotator::new(red_a());
        let frame = Frame::filled(100, 100, [0, 0, 0], 0);
        let det = Detection::new("A", BBox::new(20.0, 40.0, 60.0, 80.0), 0.87);

        let out = annotator.annotate(&frame, &[det]);

        assert_eq!(out.pixel(20, 40), [255, 0, 0]);
        assert_eq!(out.pixel(21, 60), [255, 0, 0]); // 第二层线宽
        assert_eq!(out.pixel(60, 80), [255, 0, 0]);
        assert_eq!(out.pixel(40, 60), [0, 0, 0]); // 框内部不填充
        assert_eq!(frame.pixel(20, 40), [0, 0, 0]); // 输入帧不变
    }

    #[test]
    fn test_label_text() {
        let annotator = Annotator::new(red_a());
        let det = Detection::new("A", BBox::new(10.0, 50.0, 30.0, 70.0), 0.876);
        let layout = annotator.layout(200, 100, &det);
        assert_eq!(layout.text, "Alpha 0.88");
        assert_eq!(layout.color, [255, 0, 0]);

        let fallback = annotator.layout(200, 100, &Detection::new("人", det.bbox, 0.5));
        assert_eq!(fallback.text, "人 0.50");
        assert_eq!(fallback.color, [255, 255, 255]);
    }

    #[test]
    fn test_label_above_box() {
        let annotator = Annotator::new(red_a()).with_font_size(10.0);
        let det = Detection::new("A", BBox::new(10.0, 50.0, 30.0, 70.0), 0.9);
        let layout = annotator.layout(200, 100, &det);

        let label = layout.label_rect.unwrap();
        assert_eq!(label.y + label.height as i32, 50);
        assert_eq!(label.x, 10);
    }

    #[test]
    fn test_label_clipped_near_top_edge() {
        let annotator = Annotator::new(red_a()).with_font_size(10.0);
        let det = Detection::new("A", BBox::new(190.0, 2.0, 199.0, 40.0), 0.9);
        let layout = annotator.layout(200, 100, &det);

        let label = layout.label_rect.unwrap();
        assert!(label.y >= 0);
        assert!(label.x >= 0);
        assert!(label.x + label.width as i32 <= 200);
        assert!(label.y + label.height as i32 <= 100);
    }

    #[test]
    fn test_box_outside_frame_draws_nothing() {
        let annotator = Annotator::new(red_a());
        let frame = Frame::filled(50, 50, [9, 9, 9], 0);
        let det = Detection::new("A", BBox::new(60.0, 60.0, 80.0, 80.0), 0.9);

        let out = annotator.annotate(&frame, &[det]);
        assert_eq!(out.as_raw(), frame.as_raw());
    }

    #[test]
    fn test_partially_outside_box_clipped() {
        let annotator = Annotator::new(red_a());
        let frame = Frame::filled(50, 50, [0, 0, 0], 0);
        let det = Detection::new("A", BBox::new(-10.0, 30.0, 70.0, 45.0), 0.9);

        let layout = annotator.layout(50, 50, &det);
        let b = layout.box_rect.unwrap();
        assert_eq!((b.x, b.width), (0, 50));

        let out = annotator.annotate(&frame, &[det]);
        assert_eq!(out.pixel(0, 40), [255, 0, 0]);
        assert_eq!(out.pixel(49, 40), [255, 0, 0]);
    }

    #[test]
    fn test_text_color_contrast() {
        assert_eq!(text_color([255, 0, 0]), [255, 255, 255]);
        assert_eq!(text_color([255, 255, 255]), [0, 0, 0]);
        assert_eq!(text_color([0, 255, 0]), [0, 0, 0]);
    }

    /// 标签底板内与底板颜色不同的像素数 (文字笔画)
    fn ink_in_label(annotator: &Annotator, detection: &Detection) -> usize {
        let frame = Frame::filled(160, 120, [0, 0, 0], 0);
        let out = annotator.annotate(&frame, std::slice::from_ref(detection));
        let layout = annotator.layout(160, 120, detection);
        let label = layout.label_rect.unwrap();

        let mut ink = 0;
        for y in label.y..label.y + label.height as i32 {
            for x in label.x..label.x + label.width as i32 {
                if out.pixel(x as u32, y as u32) != layout.color {
                    ink += 1;
                }
            }
        }
        ink
    }

    #[test]
    fn test_default_config_draws_text() {
        let annotator = Annotator::from_config(&AnnotationConfig::default()).unwrap();
        let det = Detection::new("Helmet", BBox::new(20.0, 60.0, 120.0, 110.0), 0.9);
        assert!(ink_in_label(&annotator, &det) > 0);
    }

    #[test]
    fn test_missing_font_falls_back_to_bundled() {
        let mut config = AnnotationConfig::default();
        config.font_path = Some("assets/font/missing.ttf".into());
        config.labels.insert("A".into(), LabelStyle::new("Alpha", [255, 0, 0]));

        let annotator = Annotator::from_config(&config).unwrap();
        let det = Detection::new("A", BBox::new(20.0, 60.0, 120.0, 110.0), 0.9);
        assert!(ink_in_label(&annotator, &det) > 0);
    }

    #[test]
    fn test_without_font_plate_only() {
        let det = Detection::new("A", BBox::new(20.0, 60.0, 120.0, 110.0), 0.9);
        assert_eq!(ink_in_label(&Annotator::new(red_a()), &det), 0);
    }

    #[test]
    fn test_text_clipped_to_plate() {
        // 画面比标签文字窄, 底板被压缩, 文字不得画到底板外
        let annotator = Annotator::new(red_a())
            .with_font(bundled_font().unwrap())
            .with_font_size(16.0);
        let frame = Frame::filled(30, 40, [0, 0, 0], 0);
        let det = Detection::new("A", BBox::new(2.0, 25.0, 20.0, 38.0), 0.9);

        let out = annotator.annotate(&frame, &[det.clone()]);
        let layout = annotator.layout(30, 40, &det);
        let b = layout.box_rect.unwrap();
        let label = layout.label_rect.unwrap();
        assert_eq!(label.width, 30);

        for y in 0..40 {
            for x in 0..30 {
                let (xi, yi) = (x as i32, y as i32);
                if !b.on_border(xi, yi, 2) && !label.contains(xi, yi) {
                    assert_eq!(out.pixel(x, y), [0, 0, 0], "pixel ({}, {})", x, y);
                }
            }
        }
    }
}
