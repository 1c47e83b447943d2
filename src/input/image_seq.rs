// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 图片序列输入: 单张图片, 或目录下按文件名排序的全部图片

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{FrameSource, SourceEvent};
use crate::error::{FrameError, OpenError};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "webp", "tiff"];

pub fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    position: usize,
    next_index: u64,
    closed: bool,
    description: String,
}

impl ImageSequenceSource {
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        if !path.exists() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }

        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let file = entry?.path();
                if is_image_file(&file) {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        if files.is_empty() {
            return Err(OpenError::Unsupported(format!(
                "目录中没有图片: {}",
                path.display()
            )));
        }

        Ok(Self {
            description: format!("{} ({}张)", path.display(), files.len()),
            files,
            position: 0,
            next_index: 0,
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<SourceEvent, FrameError> {
        if self.closed {
            return Err(FrameError::UseAfterClose);
        }
        let Some(file) = self.files.get(self.position) else {
            return Ok(SourceEvent::EndOfStream);
        };
        self.position += 1;

        let image = image::open(file)
            .map_err(|e| FrameError::TransientRead(format!("{}: {}", file.display(), e)))?
            .to_rgb8();

        let index = self.next_index;
        self.next_index += 1;
        // 图片没有时间信息
        Ok(SourceEvent::Frame(Frame::new(image, index, Duration::ZERO)))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) {
        RgbImage::from_pixel(4, 3, Rgb(rgb))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", [0, 0, 255]);
        write_png(dir.path(), "a.png", [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        match source.next_frame().unwrap() {
            SourceEvent::Frame(frame) => {
                assert_eq!(frame.index(), 0);
                assert_eq!(frame.pixel(0, 0), [255, 0, 0]);
                assert_eq!((frame.width(), frame.height()), (4, 3));
            }
            SourceEvent::EndOfStream => panic!("unexpected end"),
        }
        assert!(matches!(source.next_frame(), Ok(SourceEvent::Frame(_))));
        assert!(matches!(source.next_frame(), Ok(SourceEvent::EndOfStream)));
    }

    #[test]
    fn test_corrupt_image_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        write_png(dir.path(), "b.png", [1, 2, 3]);

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(matches!(source.next_frame(), Err(FrameError::TransientRead(_))));
        match source.next_frame().unwrap() {
            SourceEvent::Frame(frame) => assert_eq!(frame.index(), 0),
            SourceEvent::EndOfStream => panic!("unexpected end"),
        }
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path()),
            Err(OpenError::Unsupported(_))
        ));
    }

    #[test]
    fn test_use_after_close() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", [1, 2, 3]);
        let mut source = ImageSequenceSource::open(&dir.path().join("a.png")).unwrap();
        source.close();
        assert!(matches!(source.next_frame(), Err(FrameError::UseAfterClose)));
    }
}
