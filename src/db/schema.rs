use crate::db::*;
use crate::error::{AppError, Result};
use crate::library::PageNumber;
use crate::storage::StagedPdf;
use parking_lot::Mutex;
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, ffi, params,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BOOK_COLUMNS: &str =
    "b.id, b.name, b.author, b.image, b.total_pages, b.pdf, b.status, b.created_at, b.updated_at";

const PAGE_COLUMNS: &str = "id, book_id, page_number, text";

/// How long a writer waits for another connection's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn row_to_book(row: &Row<'_>) -> rusqlite::Result<Book> {
    let status: String = row.get(6)?;
    Ok(Book {
        id: row.get(0)?,
        name: row.get(1)?,
        author: row.get(2)?,
        image: row.get(3)?,
        total_pages: row.get(4)?,
        pdf: row.get(5)?,
        status: ReadingStatus::parse(&status).unwrap_or_default(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_page(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        book_id: row.get(1)?,
        page_number: row.get(2)?,
        text: row.get(3)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn get_book_in(conn: &Connection, id: i64) -> Result<Option<Book>> {
    conn.query_row(
        &format!("SELECT {} FROM books b WHERE b.id = ?1", BOOK_COLUMNS),
        params![id],
        row_to_book,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
}

fn create_book_in(conn: &Connection, draft: &BookDraft) -> Result<i64> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO books (name, author, image, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            draft.name,
            draft.author,
            draft.image,
            draft.status.as_str(),
            now,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::UniquenessViolation(format!("book with name '{}'", draft.name))
        } else {
            AppError::Internal(format!("Failed to create book: {}", e))
        }
    })?;
    Ok(conn.last_insert_rowid())
}

fn update_book_in(conn: &Connection, id: i64, draft: &BookDraft) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE books SET name = ?1, author = ?2, image = ?3, status = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                draft.name,
                draft.author,
                draft.image,
                draft.status.as_str(),
                now_timestamp(),
                id,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::UniquenessViolation(format!("book with name '{}'", draft.name))
            } else {
                AppError::Internal(format!("Failed to update book: {}", e))
            }
        })?;
    Ok(rows > 0)
}

fn count_pages_in(conn: &Connection, book_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM pages WHERE book_id = ?1",
        params![book_id],
        |row| row.get(0),
    )
    .map_err(|e| AppError::Internal(format!("Failed to count pages: {}", e)))
}

/// Recompute and persist `total_pages` for one book. Only that column is written.
fn sync_total_pages(conn: &Connection, book_id: i64) -> Result<i64> {
    let total = count_pages_in(conn, book_id)?;

    conn.execute(
        "UPDATE books SET total_pages = ?1 WHERE id = ?2",
        params![total, book_id],
    )
    .map_err(|e| AppError::Internal(format!("Failed to update page count: {}", e)))?;

    tracing::debug!(book_id, total_pages = total, "Synchronized page count");
    Ok(total)
}

fn page_conflict(
    e: rusqlite::Error,
    page_number: PageNumber,
    book_id: i64,
    action: &str,
) -> AppError {
    if is_unique_violation(&e) {
        AppError::UniquenessViolation(format!(
            "page number {} in book {}",
            page_number, book_id
        ))
    } else {
        AppError::Internal(format!("Failed to {} page: {}", action, e))
    }
}

fn insert_page_in(
    conn: &Connection,
    book_id: i64,
    page_number: Option<PageNumber>,
    text: &str,
) -> Result<Page> {
    if get_book_in(conn, book_id)?.is_none() {
        return Err(AppError::NotFound(format!("Book {}", book_id)));
    }

    let page_number = match page_number {
        Some(n) if !n.is_unset() => n,
        _ => {
            let max: Option<PageNumber> = conn
                .query_row(
                    "SELECT MAX(page_number) FROM pages WHERE book_id = ?1",
                    params![book_id],
                    |row| row.get(0),
                )
                .map_err(|e| AppError::Internal(format!("Failed to get last page: {}", e)))?;
            PageNumber::after(max)?
        }
    };

    conn.execute(
        "INSERT INTO pages (book_id, page_number, text) VALUES (?1, ?2, ?3)",
        params![book_id, page_number, text],
    )
    .map_err(|e| page_conflict(e, page_number, book_id, "insert"))?;
    let id = conn.last_insert_rowid();

    sync_total_pages(conn, book_id)?;

    Ok(Page {
        id,
        book_id,
        page_number,
        text: text.to_string(),
    })
}

fn get_page_in(conn: &Connection, id: i64) -> Result<Option<Page>> {
    conn.query_row(
        &format!("SELECT {} FROM pages WHERE id = ?1", PAGE_COLUMNS),
        params![id],
        row_to_page,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get page: {}", e)))
}

fn update_page_in(
    conn: &Connection,
    id: i64,
    page_number: Option<PageNumber>,
    text: Option<&str>,
) -> Result<Page> {
    let mut page =
        get_page_in(conn, id)?.ok_or_else(|| AppError::NotFound(format!("Page {}", id)))?;

    if let Some(n) = page_number.filter(|n| !n.is_unset()) {
        page.page_number = n;
    }
    if let Some(text) = text {
        page.text = text.to_string();
    }

    conn.execute(
        "UPDATE pages SET page_number = ?1, text = ?2 WHERE id = ?3",
        params![page.page_number, page.text, id],
    )
    .map_err(|e| page_conflict(e, page.page_number, page.book_id, "update"))?;

    Ok(page)
}

fn list_pages_in(conn: &Connection, book_id: i64) -> Result<Vec<Page>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM pages WHERE book_id = ?1 ORDER BY page_number",
            PAGE_COLUMNS
        ))
        .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

    let pages = stmt
        .query_map(params![book_id], row_to_page)
        .map_err(|e| AppError::Internal(format!("Failed to list pages: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(format!("Failed to collect pages: {}", e)))?;

    Ok(pages)
}

fn delete_page_in(conn: &Connection, id: i64) -> Result<i64> {
    let book_id: i64 = conn
        .query_row(
            "SELECT book_id FROM pages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get page: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Page {}", id)))?;

    conn.execute("DELETE FROM pages WHERE id = ?1", params![id])
        .map_err(|e| AppError::Internal(format!("Failed to delete page: {}", e)))?;

    sync_total_pages(conn, book_id)?;
    Ok(book_id)
}

fn set_book_genres_in(conn: &Connection, book_id: i64, genres: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM book_genres WHERE book_id = ?1",
        params![book_id],
    )
    .map_err(|e| AppError::Internal(format!("Failed to clear genres: {}", e)))?;

    for name in genres {
        conn.execute(
            "INSERT OR IGNORE INTO genres (name) VALUES (?1)",
            params![name],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create genre: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO book_genres (book_id, genre_id)
             SELECT ?1, id FROM genres WHERE name = ?2",
            params![book_id, name],
        )
        .map_err(|e| AppError::Internal(format!("Failed to tag book: {}", e)))?;
    }
    Ok(())
}

/// Hand the book and its pages, as this transaction sees them, to `stage`
/// and record where the staged PDF will live.
fn stage_book_in(
    conn: &Connection,
    book_id: i64,
    stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
) -> Result<StagedPdf> {
    let book = get_book_in(conn, book_id)?
        .ok_or_else(|| AppError::NotFound(format!("Book {}", book_id)))?;
    let pages = list_pages_in(conn, book_id)?;

    let staged = stage(&book, &pages)?;
    conn.execute(
        "UPDATE books SET pdf = ?1 WHERE id = ?2",
        params![staged.relative(), book_id],
    )
    .map_err(|e| AppError::Internal(format!("Failed to store PDF path: {}", e)))?;

    tracing::debug!(book_id, pages = pages.len(), "Staged book rendition");
    Ok(staged)
}

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| AppError::Internal(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Run `f` in one immediate transaction, committing only if it succeeds.
    fn in_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                author TEXT NOT NULL,
                image TEXT,
                total_pages INTEGER NOT NULL DEFAULT 0,
                pdf TEXT,
                status TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Pages table (page_number in tenths)
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id INTEGER NOT NULL,
                page_number INTEGER NOT NULL CHECK (page_number BETWEEN 1 AND 99999),
                text TEXT NOT NULL,
                UNIQUE (book_id, page_number),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Genres
            CREATE TABLE IF NOT EXISTS genres (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL
            );

            CREATE TABLE IF NOT EXISTS book_genres (
                book_id INTEGER NOT NULL,
                genre_id INTEGER NOT NULL,
                PRIMARY KEY (book_id, genre_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
                FOREIGN KEY (genre_id) REFERENCES genres(id) ON DELETE CASCADE
            );

            -- Per-user reading status
            CREATE TABLE IF NOT EXISTS book_statuses (
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT '',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- One row per user, overwritten on every page read
            CREATE TABLE IF NOT EXISTS last_pages (
                user_id TEXT PRIMARY KEY,
                page_id INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS favorite_books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS book_ratings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 10),
                created_at INTEGER NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS book_feedbacks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                feedback TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_pages_book ON pages(book_id, page_number);
            CREATE INDEX IF NOT EXISTS idx_last_pages_page ON last_pages(page_id);
            CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorite_books(user_id, book_id);
            CREATE INDEX IF NOT EXISTS idx_ratings_book ON book_ratings(book_id);
            CREATE INDEX IF NOT EXISTS idx_feedbacks_book ON book_feedbacks(book_id);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== BOOK OPERATIONS ==========

    /// Create a book and return its ID.
    pub fn create_book(&self, draft: &BookDraft) -> Result<i64> {
        self.in_transaction(|tx| create_book_in(tx, draft))
    }

    /// Create a book with its genres and stage its PDF in the same transaction.
    ///
    /// Nothing is committed unless `stage` succeeds; the staged artifact's
    /// path is recorded as the book's PDF.
    pub fn create_book_staged(
        &self,
        draft: &BookDraft,
        genres: &[String],
        stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
    ) -> Result<(i64, StagedPdf)> {
        self.in_transaction(|tx| {
            let id = create_book_in(tx, draft)?;
            set_book_genres_in(tx, id, genres)?;
            let staged = stage_book_in(tx, id, stage)?;
            Ok((id, staged))
        })
    }

    /// Update book metadata. Derived fields are left alone.
    pub fn update_book(&self, id: i64, draft: &BookDraft) -> Result<bool> {
        self.in_transaction(|tx| update_book_in(tx, id, draft))
    }

    /// Update book metadata (and genres when given) and stage its PDF in the
    /// same transaction.
    pub fn update_book_staged(
        &self,
        id: i64,
        draft: &BookDraft,
        genres: Option<&[String]>,
        stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
    ) -> Result<StagedPdf> {
        self.in_transaction(|tx| {
            if !update_book_in(tx, id, draft)? {
                return Err(AppError::NotFound(format!("Book {}", id)));
            }
            if let Some(genres) = genres {
                set_book_genres_in(tx, id, genres)?;
            }
            stage_book_in(tx, id, stage)
        })
    }

    /// Stage a book's PDF from its committed state and record its path.
    pub fn stage_book(
        &self,
        id: i64,
        stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
    ) -> Result<StagedPdf> {
        self.in_transaction(|tx| stage_book_in(tx, id, stage))
    }

    /// Get book by ID.
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        get_book_in(&self.conn.lock(), id)
    }

    /// List all books.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        self.query_books(
            &format!("SELECT {} FROM books b ORDER BY b.id", BOOK_COLUMNS),
            params![],
        )
    }

    /// List books tagged with a genre.
    pub fn list_books_by_genre(&self, genre: &str) -> Result<Vec<Book>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books b
                 JOIN book_genres bg ON bg.book_id = b.id
                 JOIN genres g ON g.id = bg.genre_id
                 WHERE g.name = ?1
                 ORDER BY b.id",
                BOOK_COLUMNS
            ),
            params![genre],
        )
    }

    /// Books whose pages a user has most recently read.
    pub fn reading_history(&self, user_id: &str) -> Result<Vec<Book>> {
        self.query_books(
            &format!(
                "SELECT DISTINCT {} FROM books b
                 JOIN pages p ON p.book_id = b.id
                 JOIN last_pages lp ON lp.page_id = p.id
                 WHERE lp.user_id = ?1
                 ORDER BY b.id",
                BOOK_COLUMNS
            ),
            params![user_id],
        )
    }

    fn query_books(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(args, row_to_book)
            .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Delete a book. Pages and per-user records cascade.
    pub fn delete_book(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Count the pages of a book straight from the page table.
    pub fn count_pages(&self, book_id: i64) -> Result<i64> {
        count_pages_in(&self.conn.lock(), book_id)
    }

    // ========== PAGE OPERATIONS ==========

    /// Insert a page, assigning the next free page number when none is given.
    ///
    /// The ordinal lookup, the insert and the page count update share one
    /// immediate transaction, so concurrent appends never pick the same number.
    pub fn insert_page(
        &self,
        book_id: i64,
        page_number: Option<PageNumber>,
        text: &str,
    ) -> Result<Page> {
        self.in_transaction(|tx| insert_page_in(tx, book_id, page_number, text))
    }

    /// [`Database::insert_page`], staging the book's PDF before commit.
    pub fn insert_page_staged(
        &self,
        book_id: i64,
        page_number: Option<PageNumber>,
        text: &str,
        stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
    ) -> Result<(Page, StagedPdf)> {
        self.in_transaction(|tx| {
            let page = insert_page_in(tx, book_id, page_number, text)?;
            let staged = stage_book_in(tx, book_id, stage)?;
            Ok((page, staged))
        })
    }

    /// Change the text and/or number of a page.
    pub fn update_page(
        &self,
        id: i64,
        page_number: Option<PageNumber>,
        text: Option<&str>,
    ) -> Result<Page> {
        self.in_transaction(|tx| update_page_in(tx, id, page_number, text))
    }

    /// [`Database::update_page`], staging the book's PDF before commit.
    pub fn update_page_staged(
        &self,
        id: i64,
        page_number: Option<PageNumber>,
        text: Option<&str>,
        stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
    ) -> Result<(Page, StagedPdf)> {
        self.in_transaction(|tx| {
            let page = update_page_in(tx, id, page_number, text)?;
            let staged = stage_book_in(tx, page.book_id, stage)?;
            Ok((page, staged))
        })
    }

    /// Get page by ID.
    pub fn get_page(&self, id: i64) -> Result<Option<Page>> {
        get_page_in(&self.conn.lock(), id)
    }

    /// Pages of a book in reading order.
    pub fn list_pages(&self, book_id: i64) -> Result<Vec<Page>> {
        list_pages_in(&self.conn.lock(), book_id)
    }

    /// Delete a page and resynchronize its book's page count.
    ///
    /// Returns the owning book ID.
    pub fn delete_page(&self, id: i64) -> Result<i64> {
        self.in_transaction(|tx| delete_page_in(tx, id))
    }

    /// [`Database::delete_page`], staging the book's PDF before commit.
    pub fn delete_page_staged(
        &self,
        id: i64,
        stage: impl FnOnce(&Book, &[Page]) -> Result<StagedPdf>,
    ) -> Result<(i64, StagedPdf)> {
        self.in_transaction(|tx| {
            let book_id = delete_page_in(tx, id)?;
            let staged = stage_book_in(tx, book_id, stage)?;
            Ok((book_id, staged))
        })
    }

    // ========== GENRE OPERATIONS ==========

    /// Replace the genres of a book, creating unknown genres on the way.
    pub fn set_book_genres(&self, book_id: i64, genres: &[String]) -> Result<()> {
        self.in_transaction(|tx| set_book_genres_in(tx, book_id, genres))
    }

    /// Genre names of a book.
    pub fn get_book_genres(&self, book_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT g.name FROM genres g
                 JOIN book_genres bg ON bg.genre_id = g.id
                 WHERE bg.book_id = ?1
                 ORDER BY g.name",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let genres = stmt
            .query_map(params![book_id], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to get genres: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect genres: {}", e)))?;

        Ok(genres)
    }

    // ========== READING STATE OPERATIONS ==========

    /// Point the user's last page at `page_id`.
    pub fn touch_last_page(&self, user_id: &str, page_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO last_pages (user_id, page_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET
                page_id = excluded.page_id,
                updated_at = excluded.updated_at",
            params![user_id, page_id, now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save last page: {}", e)))?;
        Ok(())
    }

    /// Get the user's last page pointer.
    pub fn get_last_page(&self, user_id: &str) -> Result<Option<LastPage>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, page_id, updated_at FROM last_pages WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(LastPage {
                    user_id: row.get(0)?,
                    page_id: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get last page: {}", e)))
    }

    /// Mark a book as being read, unless the user already finished it.
    pub fn mark_reading(&self, user_id: &str, book_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO book_statuses (user_id, book_id, status, updated_at)
             VALUES (?1, ?2, 'reading', ?3)
             ON CONFLICT (user_id, book_id) DO UPDATE SET
                status = 'reading',
                updated_at = excluded.updated_at
             WHERE book_statuses.status != 'read'",
            params![user_id, book_id, now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update status: {}", e)))?;
        Ok(())
    }

    /// Set a user's status for a book.
    pub fn set_status(&self, user_id: &str, book_id: i64, status: ReadingStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO book_statuses (user_id, book_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, book_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![user_id, book_id, status.as_str(), now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update status: {}", e)))?;
        Ok(())
    }

    /// Get a user's status for a book.
    pub fn get_status(&self, user_id: &str, book_id: i64) -> Result<Option<ReadingStatus>> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM book_statuses WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get status: {}", e)))?;

        Ok(status.map(|s| ReadingStatus::parse(&s).unwrap_or_default()))
    }

    // ========== FAVORITE OPERATIONS ==========

    /// Add a favorite. Adding the same book twice is rejected.
    pub fn add_favorite(&self, user_id: &str, book_id: i64) -> Result<FavoriteBook> {
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM favorite_books WHERE user_id = ?1 AND book_id = ?2)",
                params![user_id, book_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to check favorites: {}", e)))?;
        if exists {
            return Err(AppError::Validation(
                "This book is already in favorites.".to_string(),
            ));
        }

        let created_at = now_timestamp();
        conn.execute(
            "INSERT INTO favorite_books (user_id, book_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, book_id, created_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add favorite: {}", e)))?;

        Ok(FavoriteBook {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            book_id,
            created_at,
        })
    }

    /// Remove a favorite.
    pub fn remove_favorite(&self, user_id: &str, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM favorite_books WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to remove favorite: {}", e)))?;
        Ok(rows > 0)
    }

    /// List a user's favorites.
    pub fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, book_id, created_at FROM favorite_books
                 WHERE user_id = ?1 ORDER BY id",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let favorites = stmt
            .query_map(params![user_id], |row| {
                Ok(FavoriteBook {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    book_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list favorites: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect favorites: {}", e)))?;

        Ok(favorites)
    }

    // ========== RATING OPERATIONS ==========

    /// Store a rating from 1 to 10.
    pub fn add_rating(&self, user_id: &str, book_id: i64, rating: i64) -> Result<BookRating> {
        if !(1..=10).contains(&rating) {
            return Err(AppError::Validation(
                "Rating must be between 1 and 10.".to_string(),
            ));
        }

        let conn = self.conn.lock();
        let created_at = now_timestamp();
        conn.execute(
            "INSERT INTO book_ratings (user_id, book_id, rating, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, book_id, rating, created_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add rating: {}", e)))?;

        Ok(BookRating {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            book_id,
            rating,
            created_at,
        })
    }

    /// Average rating of a book rounded to two decimals.
    pub fn average_rating(&self, book_id: i64) -> Result<Option<f64>> {
        let conn = self.conn.lock();
        let avg: Option<f64> = conn
            .query_row(
                "SELECT AVG(rating) FROM book_ratings WHERE book_id = ?1",
                params![book_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to average ratings: {}", e)))?;

        Ok(avg.map(|a| (a * 100.0).round() / 100.0))
    }

    // ========== FEEDBACK OPERATIONS ==========

    /// Store feedback on a book.
    pub fn add_feedback(&self, user_id: &str, book_id: i64, feedback: &str) -> Result<BookFeedback> {
        let conn = self.conn.lock();
        let created_at = now_timestamp();
        conn.execute(
            "INSERT INTO book_feedbacks (user_id, book_id, feedback, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, book_id, feedback, created_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add feedback: {}", e)))?;

        Ok(BookFeedback {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            book_id,
            feedback: feedback.to_string(),
            created_at,
        })
    }

    /// All feedback on a book, oldest first.
    pub fn list_feedback(&self, book_id: i64) -> Result<Vec<BookFeedback>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, book_id, feedback, created_at FROM book_feedbacks
                 WHERE book_id = ?1 ORDER BY id",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let feedback = stmt
            .query_map(params![book_id], |row| {
                Ok(BookFeedback {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    book_id: row.get(2)?,
                    feedback: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list feedback: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect feedback: {}", e)))?;

        Ok(feedback)
    }

    /// Delete feedback written by `user_id`.
    pub fn delete_feedback(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM book_feedbacks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete feedback: {}", e)))?;
        Ok(rows > 0)
    }
}
