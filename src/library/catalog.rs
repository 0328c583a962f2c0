use crate::db::{
    Book, BookDraft, BookFeedback, BookRating, Database, FavoriteBook, LastPage, Page,
    ReadingStatus,
};
use crate::error::{AppError, Result};
use crate::library::PageNumber;
use crate::render::{self, CoverImage};
use crate::storage::{ArtifactStore, StagedPdf};
use serde::Serialize;

const MAX_NAME_LEN: usize = 35;
const MAX_AUTHOR_LEN: usize = 60;
const MAX_GENRE_LEN: usize = 50;

/// Requested changes to an existing page.
#[derive(Debug, Clone, Default)]
pub struct PageDraft {
    /// New page number; `None` or zero keeps the current one.
    pub page_number: Option<PageNumber>,
    /// New text; `None` keeps the current one.
    pub text: Option<String>,
}

/// Book as presented to readers.
#[derive(Debug, Clone, Serialize)]
pub struct BookView {
    /// Book ID.
    pub id: i64,
    /// Book title.
    pub name: String,
    /// Cover image path.
    pub image: Option<String>,
    /// Author name.
    pub author: String,
    /// Number of pages.
    pub total_pages: i64,
    /// Rendered PDF path.
    pub pdf: Option<String>,
    /// Genre names.
    pub genre: Vec<String>,
    /// Average rating rounded to two decimals.
    pub average_rating: Option<f64>,
    /// Reading status of the requesting user.
    pub status: ReadingStatus,
}

/// Entry point for every book and page mutation.
///
/// Each mutation renders the book's PDF once, inside the transaction that
/// writes the rows, and moves it into place after commit. A failed render
/// leaves the database untouched.
#[derive(Clone)]
pub struct Catalog {
    db: Database,
    store: ArtifactStore,
}

/// Copy of `draft` with surrounding whitespace removed from its text fields.
fn normalize_draft(draft: &BookDraft) -> BookDraft {
    BookDraft {
        name: draft.name.trim().to_string(),
        author: draft.author.trim().to_string(),
        image: draft.image.clone(),
        status: draft.status,
    }
}

fn normalize_genres(genres: &[String]) -> Vec<String> {
    genres.iter().map(|g| g.trim().to_string()).collect()
}

fn validate_draft(draft: &BookDraft) -> Result<()> {
    let name_len = draft.name.chars().count();
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Book name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }

    let author_len = draft.author.chars().count();
    if author_len == 0 || author_len > MAX_AUTHOR_LEN {
        return Err(AppError::Validation(format!(
            "Author must be 1-{} characters",
            MAX_AUTHOR_LEN
        )));
    }

    Ok(())
}

fn validate_genres(genres: &[String]) -> Result<()> {
    for genre in genres {
        let len = genre.chars().count();
        if len == 0 || len > MAX_GENRE_LEN {
            return Err(AppError::Validation(format!(
                "Genre must be 1-{} characters",
                MAX_GENRE_LEN
            )));
        }
    }
    Ok(())
}

impl Catalog {
    /// Create a catalog over a database and a media store.
    pub fn new(db: Database, store: ArtifactStore) -> Self {
        Self { db, store }
    }

    /// Underlying database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Underlying media store.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Get a book or fail with `NotFound`.
    pub fn book(&self, id: i64) -> Result<Book> {
        self.db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(format!("Book {}", id)))
    }

    /// Get a page or fail with `NotFound`.
    pub fn page(&self, id: i64) -> Result<Page> {
        self.db
            .get_page(id)?
            .ok_or_else(|| AppError::NotFound(format!("Page {}", id)))
    }

    /// Pages of a book in reading order.
    pub fn pages(&self, book_id: i64) -> Result<Vec<Page>> {
        self.book(book_id)?;
        self.db.list_pages(book_id)
    }

    /// All books, or only those tagged with `genre`.
    pub fn books(&self, genre: Option<&str>) -> Result<Vec<Book>> {
        match genre.filter(|g| !g.is_empty()) {
            Some(genre) => self.db.list_books_by_genre(genre),
            None => self.db.list_books(),
        }
    }

    fn load_cover(&self, image: Option<&str>) -> Result<Option<CoverImage>> {
        image
            .map(|path| {
                let data = self.store.read_image(path)?;
                CoverImage::decode(&data)
            })
            .transpose()
    }

    /// Cover of a stored book, checked before a mutation opens its transaction.
    fn cover_of(&self, book_id: i64) -> Result<Option<CoverImage>> {
        let book = self.book(book_id)?;
        self.load_cover(book.image.as_deref())
    }

    /// Render a book as the open transaction sees it and stage the artifact.
    ///
    /// Runs with the database lock held, so it must not query the database.
    fn stage(
        &self,
        book: &Book,
        pages: &[Page],
        cover: Option<&CoverImage>,
    ) -> Result<StagedPdf> {
        let bytes = render::render_book(book, pages, cover)?;
        self.store.stage_pdf(book.id, &bytes)
    }

    /// Move a staged artifact into place once its transaction has committed.
    fn publish(&self, book_id: i64, staged: StagedPdf) -> Result<String> {
        let path = staged.commit()?;
        tracing::info!(book_id, path = %path, "Reconciled book PDF");
        Ok(path)
    }

    /// Re-render a book's PDF from its stored pages.
    pub fn reconcile(&self, book_id: i64) -> Result<Book> {
        let cover = self.cover_of(book_id)?;
        let staged = self
            .db
            .stage_book(book_id, |book, pages| self.stage(book, pages, cover.as_ref()))?;
        self.publish(book_id, staged)?;
        self.book(book_id)
    }

    /// Create a book and render its first PDF.
    ///
    /// The cover image is checked before anything is written, and the book
    /// row only commits once its PDF has been rendered.
    pub fn create_book(&self, draft: &BookDraft, genres: &[String]) -> Result<Book> {
        let draft = normalize_draft(draft);
        let genres = normalize_genres(genres);
        validate_draft(&draft)?;
        validate_genres(&genres)?;
        let cover = self.load_cover(draft.image.as_deref())?;

        let (id, staged) = self.db.create_book_staged(&draft, &genres, |book, pages| {
            self.stage(book, pages, cover.as_ref())
        })?;
        tracing::info!(book_id = id, name = %draft.name, "Created book");

        self.publish(id, staged)?;
        self.book(id)
    }

    /// Update book metadata and re-render its PDF.
    pub fn update_book(
        &self,
        id: i64,
        draft: &BookDraft,
        genres: Option<&[String]>,
    ) -> Result<Book> {
        let draft = normalize_draft(draft);
        let genres = genres.map(normalize_genres);
        validate_draft(&draft)?;
        if let Some(genres) = &genres {
            validate_genres(genres)?;
        }
        let cover = self.load_cover(draft.image.as_deref())?;

        let staged = self
            .db
            .update_book_staged(id, &draft, genres.as_deref(), |book, pages| {
                self.stage(book, pages, cover.as_ref())
            })?;
        tracing::info!(book_id = id, "Updated book");

        self.publish(id, staged)?;
        self.book(id)
    }

    /// Delete a book, its pages and its PDF.
    pub fn delete_book(&self, id: i64) -> Result<()> {
        if !self.db.delete_book(id)? {
            return Err(AppError::NotFound(format!("Book {}", id)));
        }
        self.store.remove_pdf(id)?;
        tracing::info!(book_id = id, "Deleted book");
        Ok(())
    }

    /// Add a page. A missing or zero page number appends after the last page.
    ///
    /// The page, the page count and the PDF path commit together, and only
    /// after the PDF has been rendered.
    pub fn add_page(
        &self,
        book_id: i64,
        page_number: Option<PageNumber>,
        text: &str,
    ) -> Result<Page> {
        let cover = self.cover_of(book_id)?;
        let (page, staged) = self
            .db
            .insert_page_staged(book_id, page_number, text, |book, pages| {
                self.stage(book, pages, cover.as_ref())
            })?;
        tracing::info!(
            book_id,
            page_id = page.id,
            page_number = %page.page_number,
            "Added page"
        );

        self.publish(book_id, staged)?;
        Ok(page)
    }

    /// Change a page's text or number.
    pub fn update_page(&self, id: i64, draft: &PageDraft) -> Result<Page> {
        let cover = self.cover_of(self.page(id)?.book_id)?;
        let (page, staged) = self.db.update_page_staged(
            id,
            draft.page_number,
            draft.text.as_deref(),
            |book, pages| self.stage(book, pages, cover.as_ref()),
        )?;
        tracing::info!(book_id = page.book_id, page_id = id, "Updated page");

        self.publish(page.book_id, staged)?;
        Ok(page)
    }

    /// Delete a page and return the ID of the book it belonged to.
    pub fn delete_page(&self, id: i64) -> Result<i64> {
        let cover = self.cover_of(self.page(id)?.book_id)?;
        let (book_id, staged) = self
            .db
            .delete_page_staged(id, |book, pages| self.stage(book, pages, cover.as_ref()))?;
        tracing::info!(book_id, page_id = id, "Deleted page");

        self.publish(book_id, staged)?;
        Ok(book_id)
    }

    // ========== READER FEATURES ==========

    /// Build the reader-facing representation of a book.
    pub fn view(&self, book: Book, user_id: Option<&str>) -> Result<BookView> {
        let genre = self.db.get_book_genres(book.id)?;
        let average_rating = self.db.average_rating(book.id)?;
        let status = match user_id {
            Some(user_id) => self.db.get_status(user_id, book.id)?.unwrap_or_default(),
            None => ReadingStatus::Unread,
        };

        Ok(BookView {
            id: book.id,
            name: book.name,
            image: book.image,
            author: book.author,
            total_pages: book.total_pages,
            pdf: book.pdf,
            genre,
            average_rating,
            status,
        })
    }

    /// Open a page for reading: records it as the user's last page and
    /// marks the book as being read.
    pub fn read_page(&self, user_id: &str, page_id: i64) -> Result<Page> {
        let page = self.page(page_id)?;
        self.db.touch_last_page(user_id, page.id)?;
        self.db.mark_reading(user_id, page.book_id)?;
        tracing::debug!(user_id, page_id, book_id = page.book_id, "Page read");
        Ok(page)
    }

    /// The page a user read last.
    pub fn last_page(&self, user_id: &str) -> Result<(LastPage, Page)> {
        let last = self
            .db
            .get_last_page(user_id)?
            .ok_or_else(|| AppError::NotFound("Last page for user".to_string()))?;
        let page = self.page(last.page_id)?;
        Ok((last, page))
    }

    /// Books the user has a last-page pointer into.
    pub fn history(&self, user_id: &str) -> Result<Vec<Book>> {
        self.db.reading_history(user_id)
    }

    /// Set the user's reading status for a book.
    pub fn set_status(&self, user_id: &str, book_id: i64, status: ReadingStatus) -> Result<()> {
        self.book(book_id)?;
        self.db.set_status(user_id, book_id, status)
    }

    /// Add a book to the user's favorites.
    pub fn add_favorite(&self, user_id: &str, book_id: i64) -> Result<FavoriteBook> {
        self.book(book_id)?;
        self.db.add_favorite(user_id, book_id)
    }

    /// Remove a book from the user's favorites.
    pub fn remove_favorite(&self, user_id: &str, book_id: i64) -> Result<()> {
        if !self.db.remove_favorite(user_id, book_id)? {
            return Err(AppError::NotFound(format!("Favorite book {}", book_id)));
        }
        Ok(())
    }

    /// The user's favorites.
    pub fn favorites(&self, user_id: &str) -> Result<Vec<FavoriteBook>> {
        self.db.list_favorites(user_id)
    }

    /// Rate a book from 1 to 10.
    pub fn add_rating(&self, user_id: &str, book_id: i64, rating: i64) -> Result<BookRating> {
        self.book(book_id)?;
        self.db.add_rating(user_id, book_id, rating)
    }

    /// Average rating of a book, `None` when it has no ratings.
    pub fn average_rating(&self, book_id: i64) -> Result<Option<f64>> {
        self.book(book_id)?;
        self.db.average_rating(book_id)
    }

    /// Leave feedback on a book.
    pub fn add_feedback(&self, user_id: &str, book_id: i64, text: &str) -> Result<BookFeedback> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("Feedback cannot be empty".to_string()));
        }
        self.book(book_id)?;
        self.db.add_feedback(user_id, book_id, text)
    }

    /// All feedback on a book.
    pub fn feedback(&self, book_id: i64) -> Result<Vec<BookFeedback>> {
        self.book(book_id)?;
        self.db.list_feedback(book_id)
    }

    /// Remove feedback the user wrote.
    pub fn remove_feedback(&self, user_id: &str, feedback_id: i64) -> Result<()> {
        if !self.db.delete_feedback(feedback_id, user_id)? {
            return Err(AppError::NotFound(format!("Feedback {}", feedback_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Document;
    use tempfile::TempDir;

    fn catalog() -> (Catalog, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(
            Database::open_memory().unwrap(),
            ArtifactStore::new(dir.path()),
        );
        (catalog, dir)
    }

    fn draft(name: &str) -> BookDraft {
        BookDraft {
            name: name.to_string(),
            author: "Ursula K. Le Guin".to_string(),
            ..Default::default()
        }
    }

    fn pdf_page_count(catalog: &Catalog, book: &Book) -> usize {
        let bytes = catalog.store().read(book.pdf.as_deref().unwrap()).unwrap();
        Document::load_mem(&bytes).unwrap().get_pages().len()
    }

    fn n(whole: u32) -> Option<PageNumber> {
        Some(PageNumber::whole(whole).unwrap())
    }

    #[test]
    fn new_book_gets_cover_only_pdf() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();

        assert_eq!(book.total_pages, 0);
        assert_eq!(book.pdf.as_deref(), Some("book_pdfs/book_1.pdf"));
        assert_eq!(pdf_page_count(&catalog, &book), 1);
    }

    #[test]
    fn auto_numbering_appends_after_highest_page() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();

        let first = catalog.add_page(book.id, None, "one").unwrap();
        assert_eq!(first.page_number, PageNumber::FIRST);

        catalog.add_page(book.id, n(2), "two").unwrap();
        catalog.add_page(book.id, n(3), "three").unwrap();
        let fourth = catalog.add_page(book.id, None, "four").unwrap();
        assert_eq!(fourth.page_number, PageNumber::whole(4).unwrap());

        let zero = catalog
            .add_page(book.id, Some(PageNumber::default()), "five")
            .unwrap();
        assert_eq!(zero.page_number, PageNumber::whole(5).unwrap());
    }

    #[test]
    fn duplicate_page_number_is_rejected() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        catalog.add_page(book.id, n(1), "one").unwrap();

        let err = catalog.add_page(book.id, n(1), "again").unwrap_err();
        assert!(matches!(err, AppError::UniquenessViolation(_)));
        assert_eq!(catalog.book(book.id).unwrap().total_pages, 1);
    }

    #[test]
    fn same_page_number_in_different_books_is_fine() {
        let (catalog, _dir) = catalog();
        let a = catalog.create_book(&draft("A"), &[]).unwrap();
        let b = catalog.create_book(&draft("B"), &[]).unwrap();
        catalog.add_page(a.id, n(1), "a1").unwrap();
        catalog.add_page(b.id, n(1), "b1").unwrap();
    }

    #[test]
    fn page_count_follows_inserts_and_deletes() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(catalog.add_page(book.id, None, &format!("p{}", i)).unwrap().id);
            let stored = catalog.book(book.id).unwrap();
            assert_eq!(stored.total_pages, catalog.db().count_pages(book.id).unwrap());
        }

        catalog.delete_page(ids[1]).unwrap();
        catalog.delete_page(ids[3]).unwrap();
        let stored = catalog.book(book.id).unwrap();
        assert_eq!(stored.total_pages, 3);
        assert_eq!(stored.total_pages, catalog.db().count_pages(book.id).unwrap());

        // Gaps are kept
        let numbers: Vec<String> = catalog
            .pages(book.id)
            .unwrap()
            .iter()
            .map(|p| p.page_number.to_string())
            .collect();
        assert_eq!(numbers, vec!["1", "3", "5"]);
        assert_eq!(pdf_page_count(&catalog, &stored), 4);
    }

    #[test]
    fn deleting_every_page_leaves_cover_only_pdf() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        let a = catalog.add_page(book.id, None, "a").unwrap();
        let b = catalog.add_page(book.id, None, "b").unwrap();

        catalog.delete_page(a.id).unwrap();
        catalog.delete_page(b.id).unwrap();

        let stored = catalog.book(book.id).unwrap();
        assert_eq!(stored.total_pages, 0);
        assert_eq!(pdf_page_count(&catalog, &stored), 1);
    }

    #[test]
    fn adding_a_page_overwrites_the_artifact() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        let path = book.pdf.clone().unwrap();
        let before = catalog.store().read(&path).unwrap();

        catalog.add_page(book.id, None, "new").unwrap();

        let after = catalog.store().read(&path).unwrap();
        assert_ne!(before, after);
        assert_eq!(Document::load_mem(&after).unwrap().get_pages().len(), 2);
    }

    #[test]
    fn missing_cover_image_fails_before_writing() {
        let (catalog, _dir) = catalog();
        let mut d = draft("Earthsea");
        d.image = Some("book_images/missing.png".to_string());

        let err = catalog.create_book(&d, &[]).unwrap_err();
        assert!(matches!(err, AppError::ImageUnavailable(_)));
        assert!(catalog.books(None).unwrap().is_empty());
    }

    #[test]
    fn invalid_metadata_is_rejected() {
        let (catalog, _dir) = catalog();
        assert!(matches!(
            catalog.create_book(&draft(""), &[]),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            catalog.create_book(&draft(&"x".repeat(36)), &[]),
            Err(AppError::Validation(_))
        ));

        catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        assert!(matches!(
            catalog.create_book(&draft("Earthsea"), &[]),
            Err(AppError::UniquenessViolation(_))
        ));
    }

    #[test]
    fn page_on_unknown_book_is_not_found() {
        let (catalog, _dir) = catalog();
        assert!(matches!(
            catalog.add_page(42, None, "x"),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(catalog.delete_page(42), Err(AppError::NotFound(_))));
    }

    #[test]
    fn update_page_rejects_taken_number() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        catalog.add_page(book.id, n(1), "one").unwrap();
        let two = catalog.add_page(book.id, n(2), "two").unwrap();

        let err = catalog
            .update_page(
                two.id,
                &PageDraft {
                    page_number: n(1),
                    text: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, AppError::UniquenessViolation(_)));

        let moved = catalog
            .update_page(
                two.id,
                &PageDraft {
                    page_number: Some(PageNumber::from_tenths(5).unwrap()),
                    text: Some("half".to_string()),
                },
            )
            .unwrap();
        assert_eq!(moved.page_number.to_string(), "0.5");
        assert_eq!(catalog.pages(book.id).unwrap()[0].text, "half");
    }

    #[test]
    fn deleting_book_removes_pages_and_pdf() {
        let (catalog, dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        let page = catalog.add_page(book.id, None, "a").unwrap();

        catalog.delete_book(book.id).unwrap();

        assert!(catalog.db().get_page(page.id).unwrap().is_none());
        assert!(!dir.path().join("book_pdfs/book_1.pdf").exists());
        assert!(matches!(catalog.book(book.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn reading_a_page_tracks_last_page_and_status() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        let one = catalog.add_page(book.id, None, "one").unwrap();
        let two = catalog.add_page(book.id, None, "two").unwrap();

        catalog.read_page("alice", one.id).unwrap();
        catalog.read_page("alice", two.id).unwrap();

        let (last, page) = catalog.last_page("alice").unwrap();
        assert_eq!(last.page_id, two.id);
        assert_eq!(page.text, "two");

        let view = catalog.view(catalog.book(book.id).unwrap(), Some("alice")).unwrap();
        assert_eq!(view.status, ReadingStatus::Reading);

        catalog.set_status("alice", book.id, ReadingStatus::Read).unwrap();
        catalog.read_page("alice", one.id).unwrap();
        let view = catalog.view(catalog.book(book.id).unwrap(), Some("alice")).unwrap();
        assert_eq!(view.status, ReadingStatus::Read);

        assert!(matches!(catalog.last_page("bob"), Err(AppError::NotFound(_))));
        assert_eq!(catalog.history("alice").unwrap().len(), 1);
    }

    #[test]
    fn ratings_average_and_bounds() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();

        assert_eq!(catalog.average_rating(book.id).unwrap(), None);
        assert!(matches!(
            catalog.add_rating("alice", book.id, 11),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            catalog.add_rating("alice", book.id, 0),
            Err(AppError::Validation(_))
        ));

        catalog.add_rating("alice", book.id, 7).unwrap();
        catalog.add_rating("bob", book.id, 8).unwrap();
        catalog.add_rating("carol", book.id, 8).unwrap();
        assert_eq!(catalog.average_rating(book.id).unwrap(), Some(7.67));
    }

    #[test]
    fn favorites_reject_duplicates() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();

        catalog.add_favorite("alice", book.id).unwrap();
        assert!(matches!(
            catalog.add_favorite("alice", book.id),
            Err(AppError::Validation(_))
        ));
        assert_eq!(catalog.favorites("alice").unwrap().len(), 1);

        catalog.remove_favorite("alice", book.id).unwrap();
        assert!(catalog.favorites("alice").unwrap().is_empty());
        assert!(matches!(
            catalog.remove_favorite("alice", book.id),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn feedback_can_only_be_removed_by_author() {
        let (catalog, _dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        let fb = catalog.add_feedback("alice", book.id, "Lovely").unwrap();

        assert!(matches!(
            catalog.remove_feedback("bob", fb.id),
            Err(AppError::NotFound(_))
        ));
        catalog.remove_feedback("alice", fb.id).unwrap();
        assert!(catalog.feedback(book.id).unwrap().is_empty());
    }

    #[test]
    fn genres_filter_books() {
        let (catalog, _dir) = catalog();
        let fantasy = vec!["Fantasy".to_string()];
        catalog.create_book(&draft("Earthsea"), &fantasy).unwrap();
        catalog.create_book(&draft("Dispossessed"), &["SF".to_string()]).unwrap();

        let found = catalog.books(Some("Fantasy")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Earthsea");
        assert_eq!(catalog.books(None).unwrap().len(), 2);

        let view = catalog.view(found[0].clone(), None).unwrap();
        assert_eq!(view.genre, fantasy);
    }

    fn write_cover(dir: &TempDir, name: &str) -> String {
        let relative = format!("book_images/{}", name);
        let path = dir.path().join(&relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]))
            .save(&path)
            .unwrap();
        relative
    }

    #[test]
    fn lost_cover_aborts_page_mutations_without_saving() {
        let (catalog, dir) = catalog();
        let mut d = draft("Earthsea");
        d.image = Some(write_cover(&dir, "c.png"));
        let book = catalog.create_book(&d, &[]).unwrap();
        let page = catalog.add_page(book.id, None, "one").unwrap();

        std::fs::remove_file(dir.path().join("book_images/c.png")).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                catalog.add_page(book.id, None, "two"),
                Err(AppError::ImageUnavailable(_))
            ));
        }
        assert!(matches!(
            catalog.delete_page(page.id),
            Err(AppError::ImageUnavailable(_))
        ));
        assert!(matches!(
            catalog.update_page(
                page.id,
                &PageDraft {
                    page_number: None,
                    text: Some("changed".to_string()),
                },
            ),
            Err(AppError::ImageUnavailable(_))
        ));

        let stored = catalog.book(book.id).unwrap();
        assert_eq!(stored.total_pages, 1);
        assert_eq!(catalog.db().count_pages(book.id).unwrap(), 1);
        assert_eq!(catalog.pages(book.id).unwrap()[0].text, "one");
        assert_eq!(pdf_page_count(&catalog, &stored), 2);
    }

    #[test]
    fn failed_render_rolls_back_page_writes() {
        let (catalog, dir) = catalog();
        let book = catalog.create_book(&draft("Earthsea"), &[]).unwrap();
        let page = catalog.add_page(book.id, None, "one").unwrap();

        let pdf_dir = dir.path().join("book_pdfs");
        std::fs::remove_dir_all(&pdf_dir).unwrap();
        std::fs::write(&pdf_dir, b"not a directory").unwrap();

        assert!(matches!(
            catalog.add_page(book.id, None, "two"),
            Err(AppError::Io(_))
        ));
        assert!(matches!(catalog.delete_page(page.id), Err(AppError::Io(_))));
        assert!(matches!(
            catalog.create_book(&draft("Tehanu"), &[]),
            Err(AppError::Io(_))
        ));

        assert_eq!(catalog.book(book.id).unwrap().total_pages, 1);
        assert_eq!(catalog.db().count_pages(book.id).unwrap(), 1);
        assert_eq!(catalog.books(None).unwrap().len(), 1);

        std::fs::remove_file(&pdf_dir).unwrap();
        let two = catalog.add_page(book.id, None, "two").unwrap();
        assert_eq!(two.page_number, PageNumber::whole(2).unwrap());
        assert_eq!(pdf_page_count(&catalog, &catalog.book(book.id).unwrap()), 3);
    }

    #[test]
    fn metadata_is_stored_trimmed() {
        let (catalog, _dir) = catalog();
        let padded = format!("  {}  ", "x".repeat(MAX_NAME_LEN));
        let mut d = draft(&padded);
        d.author = " Ursula K. Le Guin\n".to_string();

        let book = catalog
            .create_book(&d, &[" Fantasy ".to_string()])
            .unwrap();
        assert_eq!(book.name, "x".repeat(MAX_NAME_LEN));
        assert_eq!(book.author, "Ursula K. Le Guin");
        assert_eq!(catalog.books(Some("Fantasy")).unwrap().len(), 1);

        let updated = catalog
            .update_book(book.id, &draft("  Earthsea  "), None)
            .unwrap();
        assert_eq!(updated.name, "Earthsea");
        assert!(matches!(
            catalog.create_book(&draft("   "), &[]),
            Err(AppError::Validation(_))
        ));
    }
}
