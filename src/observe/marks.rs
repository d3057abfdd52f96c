//! 动作标记：每个成功的指针动作留下一个 Mark，整个运行期只增不减
//!
//! 坐标统一为 0-1000 归一化空间，绘制时再映射到像素。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::{atomic_write_json, read_json_or_default};

/// 执行器产出的指针轨迹（已校验到 0-1000）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointerAction {
    Click { x: u16, y: u16 },
    DoubleClick { x: u16, y: u16 },
    RightClick { x: u16, y: u16 },
    Drag { x1: u16, y1: u16, x2: u16, y2: u16 },
}

impl PointerAction {
    /// 动作结束后光标所在位置（拖拽取终点）
    pub fn end_point(&self) -> (u16, u16) {
        match *self {
            PointerAction::Click { x, y }
            | PointerAction::DoubleClick { x, y }
            | PointerAction::RightClick { x, y } => (x, y),
            PointerAction::Drag { x2, y2, .. } => (x2, y2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkKind {
    Click,
    DoubleClick,
    RightClick,
    Drag,
    Cursor,
    PreviousCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Geometry {
    Point { x: u16, y: u16 },
    Line { x1: u16, y1: u16, x2: u16, y2: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

pub const CLICK_COLOR: Color = Color::rgba(255, 255, 255, 255);
pub const DOUBLE_CLICK_COLOR: Color = Color::rgba(0, 220, 0, 255);
pub const RIGHT_CLICK_COLOR: Color = Color::rgba(80, 140, 255, 255);
pub const DRAG_COLOR: Color = Color::rgba(255, 220, 0, 220);
pub const CURSOR_COLOR: Color = Color::rgba(255, 0, 0, 200);
pub const CURSOR_RING_COLOR: Color = Color::rgba(255, 255, 255, 180);
pub const PREVIOUS_CURSOR_COLOR: Color = Color::rgba(255, 0, 0, 50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub kind: MarkKind,
    pub geometry: Geometry,
    pub color: Color,
}

impl Mark {
    pub fn from_action(action: &PointerAction) -> Self {
        match *action {
            PointerAction::Click { x, y } => Self::point(MarkKind::Click, x, y, CLICK_COLOR),
            PointerAction::DoubleClick { x, y } => {
                Self::point(MarkKind::DoubleClick, x, y, DOUBLE_CLICK_COLOR)
            }
            PointerAction::RightClick { x, y } => {
                Self::point(MarkKind::RightClick, x, y, RIGHT_CLICK_COLOR)
            }
            PointerAction::Drag { x1, y1, x2, y2 } => Self {
                kind: MarkKind::Drag,
                geometry: Geometry::Line { x1, y1, x2, y2 },
                color: DRAG_COLOR,
            },
        }
    }

    pub fn cursor(x: u16, y: u16) -> Self {
        Self::point(MarkKind::Cursor, x, y, CURSOR_COLOR)
    }

    pub fn previous_cursor(x: u16, y: u16) -> Self {
        Self::point(MarkKind::PreviousCursor, x, y, PREVIOUS_CURSOR_COLOR)
    }

    fn point(kind: MarkKind, x: u16, y: u16, color: Color) -> Self {
        Self {
            kind,
            geometry: Geometry::Point { x, y },
            color,
        }
    }
}

/// 当前与上一次光标位置（cursor_state.json）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub last_x: Option<u16>,
    pub last_y: Option<u16>,
    pub prev_x: Option<u16>,
    pub prev_y: Option<u16>,
}

impl CursorState {
    pub fn load(path: &Path) -> Self {
        read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        atomic_write_json(path, self)
    }

    pub fn current(&self) -> Option<(u16, u16)> {
        self.last_x.zip(self.last_y)
    }

    pub fn previous(&self) -> Option<(u16, u16)> {
        self.prev_x.zip(self.prev_y)
    }

    /// 光标移到本回合最后一个指针动作的终点；无指针动作时保持不变并返回 false
    pub fn advance(&mut self, actions: &[PointerAction]) -> bool {
        let Some(last) = actions.last() else {
            return false;
        };
        let (x, y) = last.end_point();
        self.prev_x = self.last_x;
        self.prev_y = self.last_y;
        self.last_x = Some(x);
        self.last_y = Some(y);
        true
    }

    /// 光标标记：先画淡化的上一位置，最后画当前位置（保证在最上层）
    pub fn marks(&self) -> Vec<Mark> {
        let mut out = Vec::with_capacity(2);
        if let Some((x, y)) = self.previous() {
            out.push(Mark::previous_cursor(x, y));
        }
        if let Some((x, y)) = self.current() {
            out.push(Mark::cursor(x, y));
        }
        out
    }
}

/// marks.json：overlay 模式下的共享标记状态，只追加
#[derive(Debug, Clone)]
pub struct MarkStore {
    path: PathBuf,
}

impl MarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Vec<Mark> {
        read_json_or_default(&self.path)
    }

    /// 追加并返回完整集合
    pub fn append(&self, new_marks: &[Mark]) -> std::io::Result<Vec<Mark>> {
        let mut marks = self.load();
        if new_marks.is_empty() && self.path.exists() {
            return Ok(marks);
        }
        marks.extend_from_slice(new_marks);
        atomic_write_json(&self.path, &marks)?;
        Ok(marks)
    }
}
