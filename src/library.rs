/// Orchestration of book and page mutations.
pub mod catalog;
/// Page ordinals.
pub mod page_number;

pub use catalog::{BookView, Catalog, PageDraft};
pub use page_number::PageNumber;
