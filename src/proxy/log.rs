//! 代理日志：每回合一行完整 JSON，每 N 回合一个文件；观察帧另存为 PNG

use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct ProxyLog {
    dir: PathBuf,
    turns_per_file: u64,
}

impl ProxyLog {
    pub fn new(dir: impl Into<PathBuf>, turns_per_file: u64) -> Self {
        Self {
            dir: dir.into(),
            turns_per_file: turns_per_file.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 第 turn 回合所在的文件（回合从 1 开始）
    pub fn file_for(&self, turn: u64) -> PathBuf {
        let first = (turn.saturating_sub(1) / self.turns_per_file) * self.turns_per_file + 1;
        let last = first + self.turns_per_file - 1;
        self.dir.join(format!("turns_{:04}_{:04}.jsonl", first, last))
    }

    pub fn screenshot_path(&self, turn: u64) -> PathBuf {
        self.dir
            .join("screenshots")
            .join(format!("turn_{:05}.png", turn))
    }

    pub async fn append(&self, turn: u64, entry: &Value) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(turn))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// 保存 data URL 中的 PNG；返回相对日志目录的路径
    pub async fn save_screenshot(&self, turn: u64, data_url: &str) -> std::io::Result<Option<String>> {
        let Some(idx) = data_url.find("base64,") else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&data_url[idx + "base64,".len()..])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let path = self.screenshot_path(turn);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path
            .strip_prefix(&self.dir)
            .ok()
            .map(|p| p.display().to_string()))
    }
}

/// 把请求体里的图片 data URL 替换为截图文件引用，其余内容原样保留
pub fn replace_image_urls(body: &Value, reference: &str) -> Value {
    let mut out = body.clone();
    if let Some(messages) = out["messages"].as_array_mut() {
        for msg in messages {
            if let Some(parts) = msg["content"].as_array_mut() {
                for part in parts {
                    if part["type"] == "image_url" {
                        part["image_url"]["url"] = Value::String(reference.to_string());
                    }
                }
            }
        }
    }
    out
}
