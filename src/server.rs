//! HTTP server and routes.

mod extract;
mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let book_routes = Router::new()
        .route("/", get(handlers::list_books).post(handlers::create_book))
        .route(
            "/{id}",
            get(handlers::get_book)
                .put(handlers::update_book)
                .delete(handlers::delete_book),
        )
        .route("/{id}/pdf", get(handlers::book_pdf))
        .route(
            "/{id}/pages",
            get(handlers::list_pages).post(handlers::create_page),
        )
        .route("/{id}/status", put(handlers::set_status))
        .route(
            "/{id}/fav",
            post(handlers::add_favorite).delete(handlers::remove_favorite),
        )
        .route(
            "/{id}/rating",
            get(handlers::get_rating).post(handlers::add_rating),
        )
        .route(
            "/{id}/feedback",
            get(handlers::list_feedback).post(handlers::add_feedback),
        );

    let page_routes = Router::new().route(
        "/{id}",
        get(handlers::read_page)
            .put(handlers::update_page)
            .delete(handlers::delete_page),
    );

    let user_routes = Router::new()
        .route("/last-page", get(handlers::last_page))
        .route("/favorites", get(handlers::favorites))
        .route("/history", get(handlers::history));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/books", book_routes)
        .nest("/pages", page_routes)
        .nest("/users", user_routes)
        .route("/feedback/{id}", delete(handlers::remove_feedback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
