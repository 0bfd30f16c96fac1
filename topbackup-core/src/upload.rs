use crate::collaborators::RemoteUploader;
use crate::config::UploadConfig;
use crate::constants::{timeout, upload};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use reqwest::{Body, Client};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::info;

/// 通过 HTTP PUT 上传备份文件
#[derive(Debug, Clone)]
pub struct HttpUploader {
    config: UploadConfig,
    client: Client,
}

impl HttpUploader {
    pub fn new(config: UploadConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(BackupError::configuration("上传服务器地址未配置"));
        }

        let client = Client::builder()
            .user_agent(upload::USER_AGENT)
            .connect_timeout(Duration::from_secs(timeout::UPLOAD_TIMEOUT))
            .build()?;

        Ok(Self { config, client })
    }

    /// 目标地址：{scheme}://{host}:{port}/{remote_path}/{file_name}
    pub fn target_url(&self, file_name: &str) -> String {
        let scheme = if self.config.use_tls { "https" } else { "http" };
        let host = self
            .config
            .host
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let remote_path = self.config.remote_path.trim_matches('/');

        if remote_path.is_empty() {
            format!("{scheme}://{host}:{}/{file_name}", self.config.port)
        } else {
            format!(
                "{scheme}://{host}:{}/{remote_path}/{file_name}",
                self.config.port
            )
        }
    }
}

#[async_trait]
impl RemoteUploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| BackupError::validation(format!("无效的文件路径: {}", path.display())))?;

        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let url = self.target_url(&file_name);
        info!("开始上传 {} 到 {}", file_name, url);

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        if !self.config.user.is_empty() {
            request = request.basic_auth(&self.config.user, Some(&self.config.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(BackupError::connectivity(format!("上传服务器返回 {status}")));
        }
        if !status.is_success() {
            return Err(BackupError::backup(format!("上传被拒绝: {status}")));
        }

        info!("上传完成: {}", file_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn config(host: &str, port: u16, use_tls: bool) -> UploadConfig {
        UploadConfig {
            host: host.to_string(),
            port,
            remote_path: "/backups/loja".to_string(),
            use_tls,
            ..UploadConfig::default()
        }
    }

    #[test]
    fn test_target_url() {
        let uploader = HttpUploader::new(config("https://files.example.com/", 8443, true)).unwrap();
        assert_eq!(
            uploader.target_url("123.zip"),
            "https://files.example.com:8443/backups/loja/123.zip"
        );
    }

    #[test]
    fn test_requires_host() {
        let err = HttpUploader::new(UploadConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("123.zip");
        std::fs::write(&file, b"zip").unwrap();

        let uploader = HttpUploader::new(config("127.0.0.1", port, false)).unwrap();
        let err = uploader.upload(&file).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
}
