//! 笔记存储：memory.jsonl，每行一个 JSON 字符串，只追加

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct NoteStore {
    path: PathBuf,
}

impl NoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, note: &str) -> std::io::Result<()> {
        let mut line = serde_json::to_string(note)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// 全部笔记；损坏的行跳过
    pub async fn load(&self) -> std::io::Result<Vec<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<String>(l) {
                Ok(note) => Some(note),
                Err(e) => {
                    tracing::warn!("skipping unreadable note line: {}", e);
                    None
                }
            })
            .collect())
    }

    /// recall() 的返回文本
    pub async fn render(&self) -> std::io::Result<String> {
        let notes = self.load().await?;
        if notes.is_empty() {
            return Ok("(no memories yet)".to_string());
        }
        Ok(notes
            .iter()
            .map(|n| format!("- {}", n))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
