//! Ingestion 错误类型

use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 流已关闭，不再接受写入
    #[error("stream '{stream}' is closed")]
    Closed {
        /// 流名称
        stream: String,
    },

    /// 输入读取失败
    #[error("failed to read input '{path}': {source}")]
    Read {
        /// 输入路径 (`-` 表示 stdin)
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
