//! overlay 图层：透明 RGBA，显示器尺寸，overlay 进程是唯一写者

use std::path::Path;

use image::RgbaImage;

use crate::core::error::ObserveError;
use crate::observe::marks::{CursorState, Mark};
use crate::observe::raster::draw_marks;
use crate::storage::atomic_write;

/// 全部历史标记在下，光标在最上
pub fn render_layer(marks: &[Mark], cursor: &CursorState, width: u32, height: u32) -> RgbaImage {
    let mut layer = RgbaImage::new(width, height);
    draw_marks(&mut layer, marks);
    draw_marks(&mut layer, &cursor.marks());
    layer
}

pub fn write_layer(path: &Path, layer: &RgbaImage) -> std::io::Result<()> {
    atomic_write(path, layer.as_raw())
}

/// 读取图层；缺失或尺寸不符时返回 None（该帧不叠加）
pub fn read_layer(path: &Path, width: u32, height: u32) -> Result<Option<RgbaImage>, ObserveError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ObserveError::Canvas {
                path: path.display().to_string(),
                source: e,
            })
        }
    };
    if bytes.len() != width as usize * height as usize * 4 {
        tracing::warn!(path = %path.display(), "overlay layer size mismatch, skipping composite");
        return Ok(None);
    }
    Ok(RgbaImage::from_raw(width, height, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::marks::PointerAction;
    use tempfile::TempDir;

    #[test]
    fn test_layer_is_transparent_except_marks() {
        let action = PointerAction::Click { x: 500, y: 500 };
        let layer = render_layer(&[Mark::from_action(&action)], &CursorState::default(), 100, 100);
        assert_eq!(layer.get_pixel(0, 0).0[3], 0);
        assert_eq!(layer.get_pixel(50, 50).0, [255, 255, 255, 255]);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overlay_layer.rgba");
        write_layer(&path, &layer).unwrap();
        assert_eq!(read_layer(&path, 100, 100).unwrap().unwrap(), layer);
        assert!(read_layer(&path, 10, 10).unwrap().is_none());
    }
}
