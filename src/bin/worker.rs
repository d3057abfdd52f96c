//! scribe-worker：每回合一次性子进程
//!
//! 用法：`scribe-worker execute|observe`。stdin 读一个 JSON 请求，stdout 写一个 JSON 响应后退出；
//! 日志写 stderr，由父进程转发。

use anyhow::{bail, Context};
use scribe::observability;
use scribe::worker::{run_execute, run_observe, EXECUTE_ROLE, OBSERVE_ROLE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let role = std::env::args().nth(1).unwrap_or_default();
    observability::init_stderr(&role);

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading request from stdin")?;

    let output = match role.as_str() {
        EXECUTE_ROLE => {
            let req = serde_json::from_str(&input).context("parsing execute request")?;
            serde_json::to_vec(&run_execute(req).await)?
        }
        OBSERVE_ROLE => {
            let req = serde_json::from_str(&input).context("parsing observe request")?;
            serde_json::to_vec(&run_observe(req).await)?
        }
        other => bail!("unknown worker role {:?} (expected {} or {})", other, EXECUTE_ROLE, OBSERVE_ROLE),
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;
    Ok(())
}
