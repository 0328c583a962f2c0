//! reading-rs: backend of a reading platform with PDF rendition of books.
//!
//! Books are made of numbered pages stored in SQLite. Every change to a
//! book or its pages keeps the book's page count in step with its page
//! table and re-renders a PDF holding a cover page followed by the pages in
//! reading order.
//!
//! # Features
//!
//! - Automatic page numbering (highest number plus one)
//! - Page count kept in the same transaction as page writes
//! - PDF rendition with title, author, page count and cover image
//! - Last-page tracking and per-user reading status
//! - Favorites, ratings, feedback and genres

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Books, pages and their orchestration.
pub mod library;
/// PDF rendering.
pub mod render;
/// HTTP server.
pub mod server;
/// Media files on disk.
pub mod storage;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use library::Catalog;
pub use server::AppState;
