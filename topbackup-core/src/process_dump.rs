use crate::collaborators::{DumpRequest, DumpTool};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// 通过外部进程执行数据库原生导出工具
#[derive(Debug, Clone, Default)]
pub struct ProcessDumpTool;

impl ProcessDumpTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DumpTool for ProcessDumpTool {
    async fn dump(&self, request: &DumpRequest) -> Result<()> {
        let args = request.render_arguments();
        debug!(
            "执行导出: {} {}",
            request.tool_path.display(),
            args.iter()
                .map(|a| if a == &request.password { "***" } else { a.as_str() })
                .collect::<Vec<_>>()
                .join(" ")
        );

        let child = Command::new(&request.tool_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // 超时后 child 被丢弃，进程随之终止
        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BackupError::timeout(format!("导出超过 {} 秒未完成", request.timeout.as_secs()))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("未知错误")
                .to_string();
            return Err(BackupError::backup(format!(
                "导出工具执行失败 ({}): {}",
                output.status, message
            )));
        }

        let size = match tokio::fs::metadata(&request.output).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::backup("导出工具未生成备份文件"));
            }
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            return Err(BackupError::validation("导出工具生成了空文件"));
        }

        Ok(())
    }
}
