mod schema;

pub use schema::Database;

use crate::library::PageNumber;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Reading status of a book, globally or for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingStatus {
    /// Not started.
    #[default]
    #[serde(rename = "")]
    Unread,
    /// At least one page was opened.
    #[serde(rename = "reading")]
    Reading,
    /// Finished.
    #[serde(rename = "read")]
    Read,
}

impl ReadingStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Unread => "",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Read => "read",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => Some(ReadingStatus::Unread),
            "reading" => Some(ReadingStatus::Reading),
            "read" => Some(ReadingStatus::Read),
            _ => None,
        }
    }
}

/// Stored book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Book ID.
    pub id: i64,
    /// Book title (unique).
    pub name: String,
    /// Author name.
    pub author: String,
    /// Cover image path relative to the media directory.
    pub image: Option<String>,
    /// Number of pages, derived from the page table.
    pub total_pages: i64,
    /// Rendered PDF path relative to the media directory.
    pub pdf: Option<String>,
    /// Global reading status.
    pub status: ReadingStatus,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Editable book metadata, used for both create and update.
#[derive(Debug, Clone, Default)]
pub struct BookDraft {
    /// Book title.
    pub name: String,
    /// Author name.
    pub author: String,
    /// Cover image path relative to the media directory.
    pub image: Option<String>,
    /// Global reading status.
    pub status: ReadingStatus,
}

/// One page of a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Page ID.
    pub id: i64,
    /// Owning book ID.
    #[serde(rename = "book")]
    pub book_id: i64,
    /// Position in reading order.
    pub page_number: PageNumber,
    /// Page content.
    pub text: String,
}

/// Most recently read page of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastPage {
    /// User ID.
    pub user_id: String,
    /// Page ID.
    pub page_id: i64,
    /// Last access timestamp.
    pub updated_at: i64,
}

/// Book marked as favorite by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteBook {
    /// Favorite ID.
    pub id: i64,
    /// User ID.
    #[serde(rename = "user")]
    pub user_id: String,
    /// Book ID.
    #[serde(rename = "book")]
    pub book_id: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// A user's rating of a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRating {
    /// Rating ID.
    pub id: i64,
    /// User ID.
    #[serde(rename = "user")]
    pub user_id: String,
    /// Book ID.
    #[serde(rename = "book")]
    pub book_id: i64,
    /// Score from 1 to 10.
    pub rating: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// A user's written feedback on a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookFeedback {
    /// Feedback ID.
    pub id: i64,
    /// User ID.
    #[serde(rename = "user")]
    pub user_id: String,
    /// Book ID.
    #[serde(rename = "book")]
    pub book_id: i64,
    /// Feedback text.
    pub feedback: String,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
