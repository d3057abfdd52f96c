//! 虚拟画布：运行目录里的无头原始 RGBA 缓冲（width * height * 4 字节）
//!
//! 没有文件头，外部可以用任意同尺寸的原始缓冲预置或覆盖。尺寸不符时按当前显示尺寸重建为黑底。

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::core::error::ObserveError;
use crate::observe::marks::{CursorState, Mark};
use crate::observe::raster::draw_marks;
use crate::storage::atomic_write;

fn canvas_err(path: &Path, source: std::io::Error) -> ObserveError {
    ObserveError::Canvas {
        path: path.display().to_string(),
        source,
    }
}

fn blank(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
}

/// 读取画布；缺失时创建，尺寸不符时重建
pub fn load_or_create(path: &Path, width: u32, height: u32) -> Result<RgbaImage, ObserveError> {
    let expected = width as usize * height as usize * 4;
    match std::fs::read(path) {
        Ok(bytes) if bytes.len() == expected => {
            RgbaImage::from_raw(width, height, bytes).ok_or_else(|| {
                canvas_err(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "canvas buffer rejected"),
                )
            })
        }
        Ok(bytes) => {
            tracing::warn!(
                path = %path.display(),
                found = bytes.len(),
                expected,
                "Canvas size mismatch, recreating at {}x{}",
                width,
                height
            );
            let img = blank(width, height);
            save(path, &img)?;
            Ok(img)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let img = blank(width, height);
            save(path, &img)?;
            tracing::info!(path = %path.display(), "Created virtual canvas {}x{}", width, height);
            Ok(img)
        }
        Err(e) => Err(canvas_err(path, e)),
    }
}

pub fn save(path: &Path, img: &RgbaImage) -> Result<(), ObserveError> {
    atomic_write(path, img.as_raw()).map_err(|e| canvas_err(path, e))
}

/// 把本回合的新标记与光标画进画布并写回。
/// 没有新标记时不绘制、不写盘，缓冲保持逐字节不变。
pub fn apply_marks(
    path: &Path,
    width: u32,
    height: u32,
    new_marks: &[Mark],
    cursor: &CursorState,
) -> Result<RgbaImage, ObserveError> {
    let mut img = load_or_create(path, width, height)?;
    if new_marks.is_empty() {
        return Ok(img);
    }
    tracing::debug!("Drawing {} marks on virtual canvas", new_marks.len());
    draw_marks(&mut img, new_marks);
    draw_marks(&mut img, &cursor.marks());
    save(path, &img)?;
    Ok(img)
}
