//! PDF rendition of a book.
//!
//! The document holds a cover page (title, author, page count and the
//! optional cover image) followed by one PDF page per stored page, in
//! page-number order. Text is drawn verbatim on a single line with the
//! standard Helvetica font: nothing is wrapped, so long text runs off the
//! page.

use crate::db::{Book, Page};
use crate::error::{AppError, Result};
use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

/// US Letter width in points.
pub const PAGE_WIDTH: i64 = 612;

/// US Letter height in points.
pub const PAGE_HEIGHT: i64 = 792;

const LEFT_MARGIN: i64 = 100;
const FONT_SIZE: i64 = 12;
const COVER_IMAGE_Y: i64 = 600;
const COVER_IMAGE_SIZE: i64 = 200;
const JPEG_QUALITY: u8 = 90;

/// Cover image ready to embed (JPEG, RGB).
#[derive(Debug, Clone)]
pub struct CoverImage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

impl CoverImage {
    /// Decode any supported image format and re-encode it for embedding.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data)
            .map_err(|e| AppError::ImageUnavailable(format!("Failed to decode image: {}", e)))?;

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&rgb)?;

        Ok(Self {
            jpeg,
            width,
            height,
        })
    }

    /// Pixel dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// WinAnsi byte of a character, `None` when the encoding has no glyph for it.
fn win_ansi(c: char) -> Option<u8> {
    let byte = match c {
        ' '..='~' | '\u{a0}'..='\u{ff}' => return u8::try_from(u32::from(c)).ok(),
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8a,
        '\u{2039}' => 0x8b,
        '\u{0152}' => 0x8c,
        '\u{017d}' => 0x8e,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9a,
        '\u{203a}' => 0x9b,
        '\u{0153}' => 0x9c,
        '\u{017e}' => 0x9e,
        '\u{0178}' => 0x9f,
        _ => return None,
    };
    Some(byte)
}

/// Map text onto WinAnsiEncoding, the encoding declared for the standard font.
///
/// Characters without a glyph become `?`.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars().map(|c| win_ansi(c).unwrap_or(b'?')).collect()
}

fn show_text(ops: &mut Vec<Operation>, x: i64, y: i64, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(b"F1".to_vec()), Object::Integer(FONT_SIZE)],
    ));
    ops.push(Operation::new(
        "Td",
        vec![Object::Integer(x), Object::Integer(y)],
    ));
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(encode_text(text))],
    ));
    ops.push(Operation::new("ET", vec![]));
}

fn cover_operations(book: &Book, with_image: bool) -> Vec<Operation> {
    let mut ops = Vec::new();
    show_text(&mut ops, LEFT_MARGIN, 750, &format!("Book Title: {}", book.name));
    show_text(&mut ops, LEFT_MARGIN, 735, &format!("Author: {}", book.author));
    show_text(
        &mut ops,
        LEFT_MARGIN,
        720,
        &format!("Total Pages: {}", book.total_pages),
    );

    if with_image {
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                Object::Integer(COVER_IMAGE_SIZE),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(COVER_IMAGE_SIZE),
                Object::Integer(LEFT_MARGIN),
                Object::Integer(COVER_IMAGE_Y),
            ],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]));
        ops.push(Operation::new("Q", vec![]));
    }

    ops
}

fn page_operations(page: &Page) -> Vec<Operation> {
    let mut ops = Vec::new();
    show_text(
        &mut ops,
        LEFT_MARGIN,
        700,
        &format!("Page Number: {}", page.page_number),
    );
    show_text(&mut ops, LEFT_MARGIN, 685, &page.text);
    ops
}

/// Append one page to the document and return its object ID.
fn add_page(
    doc: &mut Document,
    parent: ObjectId,
    resources: Dictionary,
    operations: Vec<Operation>,
) -> Result<ObjectId> {
    let content = Content { operations };
    let encoded = content
        .encode()
        .map_err(|e| AppError::Pdf(format!("Failed to encode page content: {}", e)))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(parent),
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(PAGE_WIDTH),
            Object::Integer(PAGE_HEIGHT),
        ],
        "Contents" => Object::Reference(content_id),
        "Resources" => resources,
    }))
}

/// Render a book and its pages to PDF bytes.
///
/// `pages` must already be in reading order. The result always has
/// `pages.len() + 1` pages.
pub fn render_book(book: &Book, pages: &[Page], cover: Option<&CoverImage>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");

    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(encode_text(&book.name)),
        "Author" => Object::string_literal(encode_text(&book.author)),
        "Producer" => Object::string_literal("reading-rs"),
    });
    doc.trailer.set("Info", Object::Reference(info_id));

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let font_resources = || {
        dictionary! {
            "Font" => dictionary! {
                "F1" => Object::Reference(font_id),
            },
        }
    };

    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages.len() + 1);

    // Cover
    let mut cover_resources = font_resources();
    if let Some(image) = cover {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image.jpeg.clone(),
        ));
        cover_resources.set(
            "XObject",
            dictionary! {
                "Im1" => Object::Reference(image_id),
            },
        );
    }
    kids.push(add_page(
        &mut doc,
        pages_id,
        cover_resources,
        cover_operations(book, cover.is_some()),
    )?);

    for page in pages {
        kids.push(add_page(
            &mut doc,
            pages_id,
            font_resources(),
            page_operations(page),
        )?);
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut pdf_bytes = Vec::new();
    doc.save_to(&mut pdf_bytes)
        .map_err(|e| AppError::Pdf(format!("Failed to save PDF: {}", e)))?;

    tracing::debug!(
        book_id = book.id,
        sections = count,
        size = pdf_bytes.len(),
        "Rendered book"
    );

    Ok(pdf_bytes)
}
