//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / signature / description / call），由 ToolRegistry 按名注册与查找。
//! 注册表就是全部可达能力：叙事里只能调用这里声明过的名字，参数只能是字面量。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::grammar::Literal;
use crate::actions::notes::NoteStore;
use crate::core::error::ActionError;
use crate::display::InputDevice;
use crate::observe::marks::PointerAction;

/// 工具执行时可用的能力
#[derive(Clone)]
pub struct ToolContext {
    /// 动作总开关；关闭时指针/键入类调用返回 Suppressed
    pub execute: bool,
    pub input: Arc<dyn InputDevice>,
    pub notes: NoteStore,
}

/// 单次调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// 成功；pointer 为需要留下标记的指针轨迹
    Done {
        value: String,
        pointer: Option<PointerAction>,
    },
    /// 总开关关闭，调用被识别但未执行
    Suppressed,
}

impl ToolOutput {
    pub fn ok() -> Self {
        Self::Done {
            value: "OK".to_string(),
            pointer: None,
        }
    }

    pub fn pointer(action: PointerAction) -> Self {
        Self::Done {
            value: "OK".to_string(),
            pointer: Some(action),
        }
    }
}

/// 工具 trait：名称、签名与描述（供 help 与零调用提示）、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// 形如 `click(x, y)`
    fn signature(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn call(&self, args: &[Literal], ctx: &ToolContext) -> Result<ToolOutput, ActionError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，并保留注册顺序用于列表展示
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if self.tools.insert(name, Arc::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn call(
        &self,
        name: &str,
        args: &[Literal],
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ActionError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ActionError::UnknownTool(name.to_string()))?;
        tool.call(args, ctx).await
    }

    /// 注册顺序的名称列表
    pub fn tool_names(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    /// (signature, description)，注册顺序
    pub fn catalog(&self) -> Vec<(&'static str, &'static str)> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| (t.signature(), t.description()))
            .collect()
    }
}

/// 参数个数检查
pub fn expect_arity(
    tool: &'static str,
    args: &[Literal],
    expected: usize,
) -> Result<(), ActionError> {
    if args.len() != expected {
        return Err(ActionError::Arity {
            tool,
            expected: arity_text(expected),
            got: args.len(),
        });
    }
    Ok(())
}

fn arity_text(n: usize) -> &'static str {
    match n {
        0 => "0",
        1 => "1",
        2 => "2",
        4 => "4",
        _ => "?",
    }
}

/// 坐标参数：整数 0-1000，浮点截断，字符串是类型错误
pub fn coord(args: &[Literal], idx: usize, name: &'static str) -> Result<u16, ActionError> {
    let lit = args.get(idx).ok_or(ActionError::NotANumber {
        name,
        got: "nothing",
    })?;
    let value = match lit {
        Literal::Int(v) => *v,
        Literal::Float(f) => f.trunc() as i64,
        Literal::Str(_) => {
            return Err(ActionError::NotANumber {
                name,
                got: lit.type_name(),
            })
        }
    };
    if !(0..=1000).contains(&value) {
        return Err(ActionError::OutOfRange { name, value });
    }
    Ok(value as u16)
}

/// 文本参数
pub fn text_arg<'a>(
    tool: &'static str,
    args: &'a [Literal],
    idx: usize,
) -> Result<&'a str, ActionError> {
    match args.get(idx) {
        Some(Literal::Str(s)) => Ok(s),
        Some(other) => Err(ActionError::NotAString {
            tool,
            got: other.type_name(),
        }),
        None => Err(ActionError::NotAString {
            tool,
            got: "nothing",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_validation() {
        let args = vec![
            Literal::Int(500),
            Literal::Float(12.9),
            Literal::Int(1001),
            Literal::Str("a".into()),
            Literal::Int(-1),
        ];
        assert_eq!(coord(&args, 0, "x").unwrap(), 500);
        assert_eq!(coord(&args, 1, "y").unwrap(), 12);
        assert_eq!(
            coord(&args, 2, "x"),
            Err(ActionError::OutOfRange {
                name: "x",
                value: 1001
            })
        );
        assert!(matches!(
            coord(&args, 3, "y"),
            Err(ActionError::NotANumber { got: "str", .. })
        ));
        assert!(matches!(coord(&args, 4, "x"), Err(ActionError::OutOfRange { .. })));
    }

    #[test]
    fn test_arity_error_message() {
        let err = expect_arity("click", &[Literal::Int(1)], 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ArityError: click() takes 2 argument(s) (1 given)"
        );
    }
}
