//! 运行目录内的文件布局与原子写
//!
//! 所有状态文件都以「写临时文件 + rename」落盘，读者（overlay、外部面板）永远看不到半截内容。

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const STATE_FILE: &str = "state.json";
pub const PAUSE_FILE: &str = "PAUSED";
pub const CANVAS_FILE: &str = "virtual_canvas.rgba";
pub const MARKS_FILE: &str = "marks.json";
pub const CURSOR_FILE: &str = "cursor_state.json";
pub const NOTES_FILE: &str = "memory.jsonl";
pub const OVERLAY_LAYER_FILE: &str = "overlay_layer.rgba";
pub const OVERLAY_SIGNAL_FILE: &str = "overlay.signal";
pub const OVERLAY_ACK_FILE: &str = "overlay.ack";
pub const PROXY_LOG_DIR: &str = "proxy_log";

/// 运行目录：一次运行的全部持久化状态
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 打开已有目录，或在 runs_root 下按时间戳新建
    pub fn open_or_create(existing: Option<&Path>, runs_root: &Path) -> std::io::Result<Self> {
        if let Some(dir) = existing {
            if dir.is_dir() {
                return Ok(Self::new(dir));
            }
        }
        let name = chrono::Local::now().format("run_%Y%m%d_%H%M%S").to_string();
        let root = runs_root.join(name);
        std::fs::create_dir_all(&root)?;
        Ok(Self::new(root))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn state(&self) -> PathBuf {
        self.join(STATE_FILE)
    }

    pub fn pause(&self) -> PathBuf {
        self.join(PAUSE_FILE)
    }

    pub fn canvas(&self) -> PathBuf {
        self.join(CANVAS_FILE)
    }

    pub fn marks(&self) -> PathBuf {
        self.join(MARKS_FILE)
    }

    pub fn cursor(&self) -> PathBuf {
        self.join(CURSOR_FILE)
    }

    pub fn notes(&self) -> PathBuf {
        self.join(NOTES_FILE)
    }

    pub fn overlay_layer(&self) -> PathBuf {
        self.join(OVERLAY_LAYER_FILE)
    }

    pub fn overlay_signal(&self) -> PathBuf {
        self.join(OVERLAY_SIGNAL_FILE)
    }

    pub fn overlay_ack(&self) -> PathBuf {
        self.join(OVERLAY_ACK_FILE)
    }

    pub fn proxy_log(&self) -> PathBuf {
        self.join(PROXY_LOG_DIR)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// 原子写字节
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    if let Err(e) = std::fs::write(&tmp, data).and_then(|_| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// 原子写 JSON（pretty）
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    atomic_write(path, &data)
}

/// 读 JSON；文件缺失或损坏时返回默认值
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read(path) {
        Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "unreadable json, using default: {}", e);
            T::default()
        }),
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("a.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_read_json_or_default_on_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, "{not json").unwrap();
        let v: Vec<u32> = read_json_or_default(&path);
        assert!(v.is_empty());
    }

    #[test]
    fn test_open_existing_run_dir() {
        let dir = TempDir::new().unwrap();
        let run = RunDir::open_or_create(Some(dir.path()), Path::new("unused")).unwrap();
        assert_eq!(run.path(), dir.path());
        assert_eq!(run.state(), dir.path().join(STATE_FILE));
    }
}
