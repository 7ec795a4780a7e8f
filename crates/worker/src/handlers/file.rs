use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use taskbus_core::{
    models::{FileOperation, FileProcessingMessage},
    traits::MessageHandler,
    Result, TaskbusError,
};
use tracing::{info, warn};

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub extension: Option<String>,
}

/// 读取文件系统元数据
pub async fn extract_metadata(path: &Path) -> Result<FileMetadata> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| TaskbusError::Handler(format!("读取文件 {} 失败: {e}", path.display())))?;

    if !metadata.is_file() {
        return Err(TaskbusError::Handler(format!(
            "{} 不是普通文件",
            path.display()
        )));
    }

    Ok(FileMetadata {
        size_bytes: metadata.len(),
        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        extension: path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase()),
    })
}

/// 病毒扫描和缩略图生成的实现方
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn virus_scan(&self, path: &Path, options: &serde_json::Value)
        -> Result<serde_json::Value>;

    async fn generate_thumbnail(
        &self,
        path: &Path,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// 未接入扫描引擎和图像库时使用：确认文件存在后记录日志
#[derive(Debug, Default, Clone)]
pub struct LoggingFileProcessor;

#[async_trait]
impl FileProcessor for LoggingFileProcessor {
    async fn virus_scan(
        &self,
        path: &Path,
        _options: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let metadata = extract_metadata(path).await?;
        warn!("未配置病毒扫描引擎，跳过扫描: {}", path.display());
        Ok(json!({"scanned": false, "size_bytes": metadata.size_bytes}))
    }

    async fn generate_thumbnail(
        &self,
        path: &Path,
        _options: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        extract_metadata(path).await?;
        warn!("未配置缩略图生成器，跳过: {}", path.display());
        Ok(json!({"generated": false}))
    }
}

/// 文件处理队列处理器
pub struct FileProcessingHandler {
    processor: Arc<dyn FileProcessor>,
}

impl FileProcessingHandler {
    pub fn new(processor: Arc<dyn FileProcessor>) -> Self {
        Self { processor }
    }

    pub async fn process(&self, message: &FileProcessingMessage) -> Result<serde_json::Value> {
        let path = Path::new(&message.file_path);
        match message.operation {
            FileOperation::ExtractMetadata => {
                let metadata = extract_metadata(path).await?;
                serde_json::to_value(metadata)
                    .map_err(|e| TaskbusError::Serialization(format!("文件元数据: {e}")))
            }
            FileOperation::VirusScan => self.processor.virus_scan(path, &message.options).await,
            FileOperation::GenerateThumbnail => {
                self.processor
                    .generate_thumbnail(path, &message.options)
                    .await
            }
        }
    }
}

#[async_trait]
impl MessageHandler<FileProcessingMessage> for FileProcessingHandler {
    async fn handle(&self, message: FileProcessingMessage) -> Result<()> {
        let output = self.process(&message).await?;
        info!(
            "文件 {} ({}) 处理完成: {} -> {}",
            message.file_id, message.file_path, message.operation, output
        );
        Ok(())
    }
}
