//! 观察层：标记、光栅绘制、虚拟画布、流水线

pub mod canvas;
pub mod marks;
pub mod pipeline;
pub mod raster;

pub use marks::{CursorState, Mark, MarkKind, MarkStore, PointerAction};
pub use pipeline::{observe, Frame, ObservationMode};
