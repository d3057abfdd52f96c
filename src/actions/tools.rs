//! 内置工具：指针、键入、笔记与帮助
//!
//! 指针与键入类工具先校验参数，再看总开关；物理设备由 ToolContext.input 决定（可能是 NullInput）。

use async_trait::async_trait;

use crate::actions::grammar::Literal;
use crate::actions::registry::{coord, expect_arity, text_arg, Tool, ToolContext, ToolOutput, ToolRegistry};
use crate::core::error::ActionError;
use crate::display::MouseButton;
use crate::observe::marks::PointerAction;

/// 设备调用放到阻塞线程里执行（真实输入实现内部会 sleep）
async fn on_device<F>(ctx: &ToolContext, f: F) -> Result<(), ActionError>
where
    F: FnOnce(&dyn crate::display::InputDevice) -> Result<(), String> + Send + 'static,
{
    let input = ctx.input.clone();
    tokio::task::spawn_blocking(move || f(input.as_ref()))
        .await
        .map_err(|e| ActionError::Device(e.to_string()))?
        .map_err(ActionError::Device)
}

fn point_args(tool: &'static str, args: &[Literal]) -> Result<(u16, u16), ActionError> {
    expect_arity(tool, args, 2)?;
    Ok((coord(args, 0, "x")?, coord(args, 1, "y")?))
}

pub struct ClickTool;

#[async_trait]
impl Tool for ClickTool {
    fn name(&self) -> &'static str {
        "click"
    }

    fn signature(&self) -> &'static str {
        "click(x, y)"
    }

    fn description(&self) -> &'static str {
        "Left click at (x, y), coordinates 0-1000"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        let (x, y) = point_args(self.name(), args)?;
        if !ctx.execute {
            return Ok(ToolOutput::Suppressed);
        }
        on_device(ctx, move |d| d.click(MouseButton::Left, x, y, 1)).await?;
        Ok(ToolOutput::pointer(PointerAction::Click { x, y }))
    }
}

pub struct RightClickTool;

#[async_trait]
impl Tool for RightClickTool {
    fn name(&self) -> &'static str {
        "right_click"
    }

    fn signature(&self) -> &'static str {
        "right_click(x, y)"
    }

    fn description(&self) -> &'static str {
        "Right click at (x, y)"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        let (x, y) = point_args(self.name(), args)?;
        if !ctx.execute {
            return Ok(ToolOutput::Suppressed);
        }
        on_device(ctx, move |d| d.click(MouseButton::Right, x, y, 1)).await?;
        Ok(ToolOutput::pointer(PointerAction::RightClick { x, y }))
    }
}

pub struct DoubleClickTool;

#[async_trait]
impl Tool for DoubleClickTool {
    fn name(&self) -> &'static str {
        "double_click"
    }

    fn signature(&self) -> &'static str {
        "double_click(x, y)"
    }

    fn description(&self) -> &'static str {
        "Double click at (x, y)"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        let (x, y) = point_args(self.name(), args)?;
        if !ctx.execute {
            return Ok(ToolOutput::Suppressed);
        }
        on_device(ctx, move |d| d.click(MouseButton::Left, x, y, 2)).await?;
        Ok(ToolOutput::pointer(PointerAction::DoubleClick { x, y }))
    }
}

pub struct DragTool;

#[async_trait]
impl Tool for DragTool {
    fn name(&self) -> &'static str {
        "drag"
    }

    fn signature(&self) -> &'static str {
        "drag(x1, y1, x2, y2)"
    }

    fn description(&self) -> &'static str {
        "Press at (x1, y1), move to (x2, y2), release"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        expect_arity(self.name(), args, 4)?;
        let x1 = coord(args, 0, "x1")?;
        let y1 = coord(args, 1, "y1")?;
        let x2 = coord(args, 2, "x2")?;
        let y2 = coord(args, 3, "y2")?;
        if !ctx.execute {
            return Ok(ToolOutput::Suppressed);
        }
        on_device(ctx, move |d| d.drag((x1, y1), (x2, y2))).await?;
        Ok(ToolOutput::pointer(PointerAction::Drag { x1, y1, x2, y2 }))
    }
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &'static str {
        "write"
    }

    fn signature(&self) -> &'static str {
        "write(text)"
    }

    fn description(&self) -> &'static str {
        "Type text at the current focus (any language)"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        expect_arity(self.name(), args, 1)?;
        let text = text_arg(self.name(), args, 0)?.to_string();
        if !ctx.execute {
            return Ok(ToolOutput::Suppressed);
        }
        on_device(ctx, move |d| d.type_text(&text)).await?;
        Ok(ToolOutput::ok())
    }
}

pub struct RememberTool;

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &'static str {
        "remember"
    }

    fn signature(&self) -> &'static str {
        "remember(text)"
    }

    fn description(&self) -> &'static str {
        "Append a note to long-term memory"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        expect_arity(self.name(), args, 1)?;
        let text = text_arg(self.name(), args, 0)?;
        ctx.notes
            .append(text)
            .await
            .map_err(|e| ActionError::NoteStore(e.to_string()))?;
        Ok(ToolOutput::ok())
    }
}

pub struct RecallTool;

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &'static str {
        "recall"
    }

    fn signature(&self) -> &'static str {
        "recall()"
    }

    fn description(&self) -> &'static str {
        "List all remembered notes"
    }

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        expect_arity(self.name(), args, 0)?;
        let value = ctx
            .notes
            .render()
            .await
            .map_err(|e| ActionError::NoteStore(e.to_string()))?;
        Ok(ToolOutput::Done {
            value,
            pointer: None,
        })
    }
}

/// help()：列出全部签名；help("name")：单个工具
pub struct HelpTool {
    catalog: Vec<(&'static str, &'static str, &'static str)>,
}

#[async_trait]
impl Tool for HelpTool {
    fn name(&self) -> &'static str {
        "help"
    }

    fn signature(&self) -> &'static str {
        "help(name?)"
    }

    fn description(&self) -> &'static str {
        "Show available tools, or one tool's signature"
    }

    async fn call(&self, args: &[Literal], _ctx: &ToolContext) -> Result<ToolOutput, ActionError> {
        let value = match args.len() {
            0 => {
                let mut lines: Vec<String> = self
                    .catalog
                    .iter()
                    .map(|(_, sig, desc)| format!("{} - {}", sig, desc))
                    .collect();
                lines.push(format!("{} - {}", self.signature(), self.description()));
                lines.join("\n")
            }
            1 => {
                let wanted = text_arg(self.name(), args, 0)?;
                if wanted == self.name() {
                    format!("{} - {}", self.signature(), self.description())
                } else {
                    self.catalog
                        .iter()
                        .find(|(name, _, _)| *name == wanted)
                        .map(|(_, sig, desc)| format!("{} - {}", sig, desc))
                        .ok_or_else(|| ActionError::UnknownTool(wanted.to_string()))?
                }
            }
            got => {
                return Err(ActionError::Arity {
                    tool: "help",
                    expected: "0 or 1",
                    got,
                })
            }
        };
        Ok(ToolOutput::Done {
            value,
            pointer: None,
        })
    }
}

/// 全部内置工具；help 最后注册，目录取自此前注册的工具
pub fn standard_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ClickTool);
    registry.register(RightClickTool);
    registry.register(DoubleClickTool);
    registry.register(DragTool);
    registry.register(WriteTool);
    registry.register(RememberTool);
    registry.register(RecallTool);

    let catalog = registry
        .tool_names()
        .into_iter()
        .filter_map(|n| registry.get(n).map(|t| (n, t.signature(), t.description())))
        .collect();
    registry.register(HelpTool { catalog });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::notes::NoteStore;
    use crate::display::NullInput;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir, execute: bool) -> ToolContext {
        ToolContext {
            execute,
            input: Arc::new(NullInput),
            notes: NoteStore::new(dir.path().join("memory.jsonl")),
        }
    }

    #[tokio::test]
    async fn test_click_reports_pointer_action() {
        let dir = TempDir::new().unwrap();
        let reg = standard_registry();
        let out = reg
            .call("click", &[Literal::Int(500), Literal::Int(300)], &ctx(&dir, true))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::pointer(PointerAction::Click { x: 500, y: 300 }));
    }

    #[tokio::test]
    async fn test_master_switch_suppresses_pointer_but_validates_first() {
        let dir = TempDir::new().unwrap();
        let reg = standard_registry();
        let c = ctx(&dir, false);
        let out = reg
            .call("drag", &[Literal::Int(1), Literal::Int(2), Literal::Int(3), Literal::Int(4)], &c)
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Suppressed);
        assert!(reg
            .call("click", &[Literal::Int(5000), Literal::Int(1)], &c)
            .await
            .is_err());
        // 笔记不受总开关影响
        let out = reg
            .call("remember", &[Literal::Str("x".into())], &c)
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::ok());
    }

    #[tokio::test]
    async fn test_help_lists_every_tool() {
        let dir = TempDir::new().unwrap();
        let reg = standard_registry();
        let out = reg.call("help", &[], &ctx(&dir, true)).await.unwrap();
        let ToolOutput::Done { value, .. } = out else {
            panic!("help should succeed");
        };
        for name in reg.tool_names() {
            assert!(value.contains(name), "missing {name}");
        }
        let one = reg
            .call("help", &[Literal::Str("drag".into())], &ctx(&dir, true))
            .await
            .unwrap();
        assert!(matches!(one, ToolOutput::Done { ref value, .. } if value.starts_with("drag(x1, y1, x2, y2)")));
    }

    #[tokio::test]
    async fn test_write_rejects_number() {
        let dir = TempDir::new().unwrap();
        let reg = standard_registry();
        let err = reg
            .call("write", &[Literal::Int(3)], &ctx(&dir, true))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: write() requires str, got int");
    }
}
