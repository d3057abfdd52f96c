//! 观察流水线：按有效模式产出本回合的观察帧
//!
//! 两个独立开关（overlay、virtual_canvas）加动作总开关合成唯一的有效模式：
//! - 总开关关闭 → Simulation：照常截屏，不画标记，不动光标
//! - virtual_canvas → VirtualCanvas：只读写画布文件，不碰真实显示器
//! - overlay → OverlayCapture：写标记文件、通知 overlay、有界等待后截屏并叠加图层
//! - 否则 → RealCapture

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::{ActionsSection, ObserveSection};
use crate::core::error::ObserveError;
use crate::display::ScreenSource;
use crate::observe::canvas;
use crate::observe::marks::{CursorState, Mark, MarkStore, PointerAction};
use crate::observe::raster::{composite, encode_png};
use crate::overlay::render::read_layer;
use crate::overlay::{OverlaySignal, WaitOutcome};
use crate::storage::RunDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationMode {
    RealCapture,
    OverlayCapture,
    VirtualCanvas,
    Simulation,
}

impl ObservationMode {
    pub fn resolve(actions: &ActionsSection, observe: &ObserveSection) -> Self {
        if !actions.execute {
            ObservationMode::Simulation
        } else if observe.virtual_canvas {
            ObservationMode::VirtualCanvas
        } else if observe.overlay {
            ObservationMode::OverlayCapture
        } else {
            ObservationMode::RealCapture
        }
    }

    /// overlay 与画布模式下强制不发物理输入
    pub fn allows_physical(&self) -> bool {
        matches!(self, ObservationMode::RealCapture)
    }

    pub fn needs_overlay(&self) -> bool {
        matches!(self, ObservationMode::OverlayCapture)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationMode::RealCapture => "real_capture",
            ObservationMode::OverlayCapture => "overlay_capture",
            ObservationMode::VirtualCanvas => "virtual_canvas",
            ObservationMode::Simulation => "simulation",
        }
    }
}

/// 编码后的观察帧（PNG，base64 传输）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub png_base64: String,
    pub width: u32,
    pub height: u32,
    /// PNG 字节数
    pub byte_size: usize,
}

impl Frame {
    pub fn from_png(png: &[u8], width: u32, height: u32) -> Self {
        Self {
            png_base64: base64::engine::general_purpose::STANDARD.encode(png),
            width,
            height,
            byte_size: png.len(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.png_base64)
    }
}

/// 产出本回合的观察帧
pub async fn observe(
    run_dir: &RunDir,
    screen: &dyn ScreenSource,
    mode: ObservationMode,
    actions: &[PointerAction],
    settings: &ObserveSection,
) -> Result<Frame, ObserveError> {
    let new_marks: Vec<Mark> = actions.iter().map(Mark::from_action).collect();
    let (sw, sh) = screen.dimensions();

    let image = match mode {
        ObservationMode::Simulation => {
            settle(settings).await;
            screen.capture()?
        }
        ObservationMode::VirtualCanvas => {
            let cursor = advance_cursor(run_dir, actions)?;
            canvas::apply_marks(&run_dir.canvas(), sw, sh, &new_marks, &cursor)?
        }
        ObservationMode::OverlayCapture => {
            advance_cursor(run_dir, actions)?;
            MarkStore::new(run_dir.marks())
                .append(&new_marks)
                .map_err(|e| ObserveError::State(e.to_string()))?;
            sync_overlay(run_dir, settings).await;
            settle(settings).await;
            let mut frame = screen.capture()?;
            let (fw, fh) = frame.dimensions();
            if let Some(layer) = read_layer(&run_dir.overlay_layer(), fw, fh)? {
                composite(&mut frame, &layer);
            }
            frame
        }
        ObservationMode::RealCapture => {
            advance_cursor(run_dir, actions)?;
            settle(settings).await;
            screen.capture()?
        }
    };

    let (png, w, h) = encode_png(&image, settings.width, settings.height)?;
    tracing::debug!(mode = mode.as_str(), bytes = png.len(), "frame encoded {}x{}", w, h);
    Ok(Frame::from_png(&png, w, h))
}

fn advance_cursor(run_dir: &RunDir, actions: &[PointerAction]) -> Result<CursorState, ObserveError> {
    let path = run_dir.cursor();
    let mut cursor = CursorState::load(&path);
    if cursor.advance(actions) {
        cursor
            .save(&path)
            .map_err(|e| ObserveError::State(e.to_string()))?;
    }
    Ok(cursor)
}

/// 通知 overlay 并有界等待；失败或超时都不阻断截屏
async fn sync_overlay(run_dir: &RunDir, settings: &ObserveSection) {
    let signal = OverlaySignal::new(run_dir);
    let seq = match signal.raise() {
        Ok(seq) => seq,
        Err(e) => {
            tracing::warn!("overlay signal failed: {}", e);
            return;
        }
    };
    let outcome = signal
        .wait(seq, Duration::from_millis(settings.overlay_wait_ms))
        .await;
    match outcome {
        WaitOutcome::Acknowledged => tracing::debug!(seq, "overlay acknowledged"),
        WaitOutcome::TimedOut => {
            tracing::debug!(seq, "overlay wait elapsed, capturing anyway")
        }
    }
}

async fn settle(settings: &ObserveSection) {
    if settings.capture_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(settings.capture_delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessScreen;
    use tempfile::TempDir;

    fn settings() -> ObserveSection {
        ObserveSection {
            width: 50,
            height: 50,
            capture_delay_ms: 0,
            overlay_wait_ms: 20,
            ..ObserveSection::default()
        }
    }

    #[test]
    fn test_mode_resolution() {
        let on = ActionsSection {
            execute: true,
            physical: true,
        };
        let off = ActionsSection {
            execute: false,
            physical: true,
        };
        let mut obs = ObserveSection {
            virtual_canvas: true,
            overlay: true,
            ..ObserveSection::default()
        };
        assert_eq!(ObservationMode::resolve(&off, &obs), ObservationMode::Simulation);
        assert_eq!(ObservationMode::resolve(&on, &obs), ObservationMode::VirtualCanvas);
        obs.virtual_canvas = false;
        assert_eq!(ObservationMode::resolve(&on, &obs), ObservationMode::OverlayCapture);
        assert!(!ObservationMode::OverlayCapture.allows_physical());
        obs.overlay = false;
        assert_eq!(ObservationMode::resolve(&on, &obs), ObservationMode::RealCapture);
        assert!(ObservationMode::RealCapture.allows_physical());
    }

    #[tokio::test]
    async fn test_virtual_canvas_idle_turn_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let run = RunDir::new(dir.path());
        let screen = HeadlessScreen::new(100, 100);
        let s = settings();

        observe(&run, &screen, ObservationMode::VirtualCanvas, &[PointerAction::Click { x: 10, y: 10 }], &s)
            .await
            .unwrap();
        let canvas_before = std::fs::read(run.canvas()).unwrap();
        let cursor_before = std::fs::read(run.cursor()).unwrap();

        let frame = observe(&run, &screen, ObservationMode::VirtualCanvas, &[], &s)
            .await
            .unwrap();
        assert_eq!(std::fs::read(run.canvas()).unwrap(), canvas_before);
        assert_eq!(std::fs::read(run.cursor()).unwrap(), cursor_before);
        assert_eq!((frame.width, frame.height), (50, 50));
        assert!(frame.byte_size > 0);
    }

    #[tokio::test]
    async fn test_overlay_mode_appends_marks_and_proceeds_without_overlay() {
        let dir = TempDir::new().unwrap();
        let run = RunDir::new(dir.path());
        let screen = HeadlessScreen::new(100, 100);
        let actions = [PointerAction::Click { x: 1, y: 1 }];
        observe(&run, &screen, ObservationMode::OverlayCapture, &actions, &settings())
            .await
            .unwrap();
        observe(&run, &screen, ObservationMode::OverlayCapture, &actions, &settings())
            .await
            .unwrap();
        assert_eq!(MarkStore::new(run.marks()).load().len(), 2);
        assert_eq!(OverlaySignal::new(&run).current(), 2);
    }

    #[tokio::test]
    async fn test_simulation_touches_no_state() {
        let dir = TempDir::new().unwrap();
        let run = RunDir::new(dir.path());
        let screen = HeadlessScreen::new(64, 64);
        let frame = observe(
            &run,
            &screen,
            ObservationMode::Simulation,
            &[],
            &ObserveSection {
                width: 0,
                height: 0,
                capture_delay_ms: 0,
                ..ObserveSection::default()
            },
        )
        .await
        .unwrap();
        assert_eq!((frame.width, frame.height), (64, 64));
        assert!(!run.cursor().exists());
        assert!(!run.marks().exists());
        assert!(frame.data_url().starts_with("data:image/png;base64,"));
    }
}
