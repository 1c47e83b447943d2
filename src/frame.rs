// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;

/// 像素格式 (交付给显示端的固定格式)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 24位 RGB, 每通道8位
    Rgb8,
}

impl PixelFormat {
    pub fn channels(&self) -> u8 {
        match self {
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// 视频帧
///
/// 像素数据用Arc共享, 帧一旦生成便不可修改;
/// 标注只会生成新的帧.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    index: u64,
    timestamp: Duration,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64, timestamp: Duration) -> Self {
        Self {
            image: Arc::new(image),
            index,
            timestamp,
        }
    }

    /// 纯色帧 (测试与合成输入)
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: u64) -> Self {
        let image = RgbImage::from_pixel(width, height, image::Rgb(rgb));
        Self::new(image, index, Duration::ZERO)
    }

    /// 由同一帧派生出新像素 (保留序号与时间戳)
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            index: self.index,
            timestamp: self.timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.pixel_format().channels()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb8
    }

    /// 源中的帧序号 (从0开始, 严格递增)
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    /// 两帧是否共享同一块像素缓冲
    pub fn shares_pixels(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}
