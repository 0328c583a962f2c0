//! HTTP request handlers.

use crate::db::{Book, BookDraft, BookFeedback, BookRating, FavoriteBook, Page, ReadingStatus};
use crate::error::{AppError, Result};
use crate::library::{BookView, PageDraft, PageNumber};
use crate::server::AppState;
use crate::server::extract::JsonBody;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::io::ReaderStream;

fn views(state: &AppState, books: Vec<Book>, user_id: Option<&str>) -> Result<Vec<BookView>> {
    books
        .into_iter()
        .map(|book| state.catalog.view(book, user_id))
        .collect()
}

/// Liveness check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// BOOKS
// ============================================================================

/// Book list filter.
#[derive(Debug, Deserialize)]
pub struct BookQuery {
    genre: Option<String>,
}

/// Keeps an explicit `null` apart from an absent field.
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Book create/update request.
#[derive(Debug, Deserialize)]
pub struct BookRequest {
    name: String,
    author: String,
    #[serde(default, deserialize_with = "double_option")]
    image: Option<Option<String>>,
    status: Option<ReadingStatus>,
    #[serde(alias = "genre")]
    genres: Option<Vec<String>>,
}

/// List books, optionally filtered by genre.
pub async fn list_books(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BookQuery>,
) -> Result<Json<Vec<BookView>>> {
    let user = state.user_id(&headers);
    let books = state.catalog.books(query.genre.as_deref())?;
    Ok(Json(views(&state, books, user.as_deref())?))
}

/// Create a book and render its PDF.
pub async fn create_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<BookRequest>,
) -> Result<(StatusCode, Json<BookView>)> {
    let draft = BookDraft {
        name: req.name,
        author: req.author,
        image: req.image.flatten(),
        status: req.status.unwrap_or_default(),
    };
    let genres = req.genres.unwrap_or_default();

    let book = state.catalog.create_book(&draft, &genres)?;
    let user = state.user_id(&headers);
    Ok((
        StatusCode::CREATED,
        Json(state.catalog.view(book, user.as_deref())?),
    ))
}

/// Book representation.
pub async fn get_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<BookView>> {
    let book = state.catalog.book(id)?;
    let user = state.user_id(&headers);
    Ok(Json(state.catalog.view(book, user.as_deref())?))
}

/// Update book metadata and re-render its PDF.
///
/// Omitted `image` and `status` keep their current values and an explicit
/// `"image": null` detaches the cover. Omitted `genres` leave the genre list
/// untouched.
pub async fn update_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<BookRequest>,
) -> Result<Json<BookView>> {
    let current = state.catalog.book(id)?;
    let draft = BookDraft {
        name: req.name,
        author: req.author,
        image: req.image.unwrap_or(current.image),
        status: req.status.unwrap_or(current.status),
    };

    let book = state
        .catalog
        .update_book(id, &draft, req.genres.as_deref())?;
    let user = state.user_id(&headers);
    Ok(Json(state.catalog.view(book, user.as_deref())?))
}

/// Delete a book with its pages and PDF.
pub async fn delete_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    state.catalog.delete_book(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Download the rendered PDF of a book.
pub async fn book_pdf(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response<Body>> {
    let book = state.catalog.book(id)?;
    let relative = book
        .pdf
        .ok_or_else(|| AppError::NotFound(format!("PDF of book {}", id)))?;
    let path = state.catalog.store().resolve(&relative)?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("PDF of book {}", id))
        } else {
            e.into()
        }
    })?;
    let size = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"book_{}.pdf\"", id),
        )
        .header(header::CONTENT_LENGTH, size)
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}

/// Status change request.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    status: ReadingStatus,
}

/// Set the caller's reading status for a book.
pub async fn set_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<StatusRequest>,
) -> Result<Json<BookView>> {
    let user = state.require_user(&headers)?;
    state.catalog.set_status(&user, id, req.status)?;
    let book = state.catalog.book(id)?;
    Ok(Json(state.catalog.view(book, Some(user.as_str()))?))
}

// ============================================================================
// PAGES
// ============================================================================

/// Entry of a book's page list.
#[derive(Debug, Serialize)]
pub struct PageSummary {
    id: i64,
    page_number: PageNumber,
    book: i64,
}

/// Page create request.
#[derive(Debug, Deserialize)]
pub struct PageRequest {
    text: String,
    page_number: Option<PageNumber>,
}

/// Page update request.
#[derive(Debug, Deserialize)]
pub struct PageUpdateRequest {
    text: Option<String>,
    page_number: Option<PageNumber>,
}

/// Pages of a book in reading order, without their text.
pub async fn list_pages(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
) -> Result<Json<Vec<PageSummary>>> {
    let pages = state
        .catalog
        .pages(book_id)?
        .into_iter()
        .map(|p| PageSummary {
            id: p.id,
            page_number: p.page_number,
            book: p.book_id,
        })
        .collect();
    Ok(Json(pages))
}

/// Add a page to a book.
pub async fn create_page(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
    JsonBody(req): JsonBody<PageRequest>,
) -> Result<(StatusCode, Json<Page>)> {
    let page = state.catalog.add_page(book_id, req.page_number, &req.text)?;
    Ok((StatusCode::CREATED, Json(page)))
}

/// Read a page. Records it as the caller's last page.
pub async fn read_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Page>> {
    let user = state.require_user(&headers)?;
    Ok(Json(state.catalog.read_page(&user, id)?))
}

/// Update a page.
pub async fn update_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<PageUpdateRequest>,
) -> Result<Json<Page>> {
    let draft = PageDraft {
        page_number: req.page_number,
        text: req.text,
    };
    Ok(Json(state.catalog.update_page(id, &draft)?))
}

/// Delete a page.
pub async fn delete_page(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    state.catalog.delete_page(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// USER DATA
// ============================================================================

/// Last page response.
#[derive(Debug, Serialize)]
pub struct LastPageResponse {
    user: String,
    page: Page,
    updated_at: i64,
}

/// The caller's last read page.
pub async fn last_page(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LastPageResponse>> {
    let user = state.require_user(&headers)?;
    let (last, page) = state.catalog.last_page(&user)?;
    Ok(Json(LastPageResponse {
        user: last.user_id,
        page,
        updated_at: last.updated_at,
    }))
}

/// The caller's favorites.
pub async fn favorites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FavoriteBook>>> {
    let user = state.require_user(&headers)?;
    Ok(Json(state.catalog.favorites(&user)?))
}

/// Books the caller has been reading.
pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BookView>>> {
    let user = state.require_user(&headers)?;
    let books = state.catalog.history(&user)?;
    Ok(Json(views(&state, books, Some(user.as_str()))?))
}

/// Add a book to the caller's favorites.
pub async fn add_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<FavoriteBook>)> {
    let user = state.require_user(&headers)?;
    let favorite = state.catalog.add_favorite(&user, id)?;
    Ok((StatusCode::CREATED, Json(favorite)))
}

/// Remove a book from the caller's favorites.
pub async fn remove_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let user = state.require_user(&headers)?;
    state.catalog.remove_favorite(&user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Average rating response.
#[derive(Debug, Serialize)]
pub struct RatingResponse {
    book: i64,
    average_rating: Option<f64>,
}

/// Rating request.
#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    rating: i64,
}

/// Average rating of a book.
pub async fn get_rating(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RatingResponse>> {
    Ok(Json(RatingResponse {
        book: id,
        average_rating: state.catalog.average_rating(id)?,
    }))
}

/// Rate a book.
pub async fn add_rating(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<RatingRequest>,
) -> Result<(StatusCode, Json<BookRating>)> {
    let user = state.require_user(&headers)?;
    let rating = state.catalog.add_rating(&user, id, req.rating)?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// Feedback request.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    feedback: String,
}

/// All feedback on a book.
pub async fn list_feedback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<BookFeedback>>> {
    Ok(Json(state.catalog.feedback(id)?))
}

/// Leave feedback on a book.
pub async fn add_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<FeedbackRequest>,
) -> Result<(StatusCode, Json<BookFeedback>)> {
    let user = state.require_user(&headers)?;
    let feedback = state.catalog.add_feedback(&user, id, &req.feedback)?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

/// Remove feedback the caller wrote.
pub async fn remove_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let user = state.require_user(&headers)?;
    state.catalog.remove_feedback(&user, id)?;
    Ok(StatusCode::NO_CONTENT)
}
