use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum LoamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Invalid key token: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, LoamError>;
