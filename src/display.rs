//! 屏幕与输入设备能力
//!
//! 截屏与注入输入对编排层是不透明的能力调用：ScreenSource / InputDevice 两个 trait。
//! 默认是无头实现（黑屏 + 只记日志的输入）；启用 `desktop` feature 后使用 xcap / enigo。

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::config::ObserveSection;
use crate::core::error::ObserveError;

/// 屏幕尺寸查询失败时的兜底分辨率
pub const FALLBACK_DISPLAY: (u32, u32) = (1920, 1080);

/// 主显示器截取
pub trait ScreenSource: Send + Sync {
    fn dimensions(&self) -> (u32, u32);
    fn capture(&self) -> Result<RgbaImage, ObserveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// 物理输入；坐标为 0-1000 归一化值，由实现映射到像素
pub trait InputDevice: Send + Sync {
    fn click(&self, button: MouseButton, x: u16, y: u16, count: u8) -> Result<(), String>;
    fn drag(&self, from: (u16, u16), to: (u16, u16)) -> Result<(), String>;
    fn type_text(&self, text: &str) -> Result<(), String>;
}

/// 无头屏幕：固定尺寸的黑帧
#[derive(Debug, Clone, Copy)]
pub struct HeadlessScreen {
    width: u32,
    height: u32,
}

impl HeadlessScreen {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl ScreenSource for HeadlessScreen {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&self) -> Result<RgbaImage, ObserveError> {
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba([0, 0, 0, 255]),
        ))
    }
}

/// 不产生任何设备效果的输入；物理执行关闭或无桌面环境时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInput;

impl InputDevice for NullInput {
    fn click(&self, button: MouseButton, x: u16, y: u16, count: u8) -> Result<(), String> {
        tracing::debug!(?button, x, y, count, "null input: click");
        Ok(())
    }

    fn drag(&self, from: (u16, u16), to: (u16, u16)) -> Result<(), String> {
        tracing::debug!(?from, ?to, "null input: drag");
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), String> {
        tracing::debug!(chars = text.chars().count(), "null input: type");
        Ok(())
    }
}

/// 按 [observe] 配置选择屏幕实现
pub fn screen_from_settings(settings: &ObserveSection) -> Arc<dyn ScreenSource> {
    if settings.display.eq_ignore_ascii_case("desktop") {
        #[cfg(feature = "desktop")]
        {
            match desktop::XcapScreen::primary() {
                Ok(screen) => return Arc::new(screen),
                Err(e) => tracing::warn!("desktop display unavailable ({}), using headless", e),
            }
        }
        #[cfg(not(feature = "desktop"))]
        tracing::warn!("display = desktop requires the `desktop` feature, using headless");
    }
    let (w, h) = (
        settings.display_width.unwrap_or(FALLBACK_DISPLAY.0),
        settings.display_height.unwrap_or(FALLBACK_DISPLAY.1),
    );
    Arc::new(HeadlessScreen::new(w, h))
}

/// 物理执行开启时返回真实输入设备，否则 NullInput
pub fn input_for(physical: bool) -> Arc<dyn InputDevice> {
    if physical {
        #[cfg(feature = "desktop")]
        {
            match desktop::EnigoInput::new() {
                Ok(dev) => return Arc::new(dev),
                Err(e) => tracing::warn!("physical input unavailable ({}), actions have no device effect", e),
            }
        }
        #[cfg(not(feature = "desktop"))]
        tracing::warn!("physical execution requires the `desktop` feature; actions have no device effect");
    }
    Arc::new(NullInput)
}

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use enigo::{Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
    use image::RgbaImage;
    use xcap::Monitor;

    use super::{InputDevice, MouseButton, ScreenSource};
    use crate::core::error::ObserveError;

    const CLICK_DELAY: Duration = Duration::from_millis(120);
    const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(60);

    pub struct XcapScreen {
        monitor: Monitor,
    }

    impl XcapScreen {
        pub fn primary() -> Result<Self, String> {
            let monitors = Monitor::all().map_err(|e| e.to_string())?;
            let monitor = monitors
                .iter()
                .find(|m| m.is_primary())
                .or_else(|| monitors.first())
                .cloned()
                .ok_or_else(|| "no monitor found".to_string())?;
            Ok(Self { monitor })
        }
    }

    impl ScreenSource for XcapScreen {
        fn dimensions(&self) -> (u32, u32) {
            (self.monitor.width(), self.monitor.height())
        }

        fn capture(&self) -> Result<RgbaImage, ObserveError> {
            let shot = self
                .monitor
                .capture_image()
                .map_err(|e| ObserveError::Capture(e.to_string()))?;
            let (w, h) = (shot.width(), shot.height());
            RgbaImage::from_raw(w, h, shot.into_raw())
                .ok_or_else(|| ObserveError::Capture("capture buffer size mismatch".to_string()))
        }
    }

    pub struct EnigoInput {
        enigo: Mutex<Enigo>,
        display: (i32, i32),
    }

    impl EnigoInput {
        pub fn new() -> Result<Self, String> {
            let enigo = Enigo::new(&Settings::default()).map_err(|e| format!("{:?}", e))?;
            let display = enigo.main_display().map_err(|e| format!("{:?}", e))?;
            Ok(Self {
                enigo: Mutex::new(enigo),
                display,
            })
        }

        fn to_px(&self, x: u16, y: u16) -> (i32, i32) {
            (
                (x as f64 / 1000.0 * self.display.0 as f64) as i32,
                (y as f64 / 1000.0 * self.display.1 as f64) as i32,
            )
        }
    }

    impl InputDevice for EnigoInput {
        fn click(&self, button: MouseButton, x: u16, y: u16, count: u8) -> Result<(), String> {
            let mut enigo = self.enigo.lock().map_err(|_| "input lock poisoned".to_string())?;
            let (px, py) = self.to_px(x, y);
            enigo
                .move_mouse(px, py, Coordinate::Abs)
                .map_err(|e| format!("{:?}", e))?;
            thread::sleep(CLICK_DELAY);
            let btn = match button {
                MouseButton::Left => Button::Left,
                MouseButton::Right => Button::Right,
            };
            for i in 0..count {
                if i > 0 {
                    thread::sleep(DOUBLE_CLICK_GAP);
                }
                enigo
                    .button(btn, Direction::Click)
                    .map_err(|e| format!("{:?}", e))?;
            }
            Ok(())
        }

        fn drag(&self, from: (u16, u16), to: (u16, u16)) -> Result<(), String> {
            let mut enigo = self.enigo.lock().map_err(|_| "input lock poisoned".to_string())?;
            let (x1, y1) = self.to_px(from.0, from.1);
            let (x2, y2) = self.to_px(to.0, to.1);
            enigo
                .move_mouse(x1, y1, Coordinate::Abs)
                .map_err(|e| format!("{:?}", e))?;
            thread::sleep(CLICK_DELAY);
            enigo
                .button(Button::Left, Direction::Press)
                .map_err(|e| format!("{:?}", e))?;
            thread::sleep(DOUBLE_CLICK_GAP);
            enigo
                .move_mouse(x2, y2, Coordinate::Abs)
                .map_err(|e| format!("{:?}", e))?;
            thread::sleep(DOUBLE_CLICK_GAP);
            enigo
                .button(Button::Left, Direction::Release)
                .map_err(|e| format!("{:?}", e))
        }

        fn type_text(&self, text: &str) -> Result<(), String> {
            let mut enigo = self.enigo.lock().map_err(|_| "input lock poisoned".to_string())?;
            enigo.text(text).map_err(|e| format!("Type failed: {:?}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_screen_uses_configured_size() {
        let settings = ObserveSection {
            display_width: Some(320),
            display_height: Some(200),
            ..ObserveSection::default()
        };
        let screen = screen_from_settings(&settings);
        assert_eq!(screen.dimensions(), (320, 200));
        let frame = screen.capture().unwrap();
        assert_eq!(frame.dimensions(), (320, 200));
    }

    #[test]
    fn test_null_input_always_succeeds() {
        let dev = input_for(false);
        assert!(dev.click(MouseButton::Left, 1, 2, 2).is_ok());
        assert!(dev.type_text("héllo").is_ok());
    }
}
