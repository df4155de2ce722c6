//! Error types for BasaltDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using BasaltError.
pub type Result<T> = std::result::Result<T, BasaltError>;

/// Errors that can occur in BasaltDB operations.
#[derive(Debug, Error)]
pub enum BasaltError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool full, no frame free and nothing evictable")]
    BufferPoolFull,

    #[error("Page not resident: {page_id}")]
    PageNotResident { page_id: PageId },

    #[error("Page pinned: {page_id}")]
    PagePinned { page_id: PageId },

    // Disk errors
    #[error("Page {page_id} out of range, file holds {num_pages} pages")]
    PageOutOfRange { page_id: PageId, num_pages: u32 },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    // Index errors
    #[error("Duplicate key")]
    DuplicateKey,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
