//! Overlapping window computation over article paragraphs.
//!
//! All indices are rune (Unicode scalar) positions into the concatenated
//! content. Every window covers at most `size` runes; neighboring windows
//! share exactly `overlap` runes, half on each side of the unique
//! interior; the interiors partition the content exactly. Paragraph
//! boundaries are respected: interiors never cross them, context padding
//! may.

use common::{error::AppError, storage::types::chunk::ChunkWindow};

/// Compute the chunk windows for a paragraph list.
///
/// `overlap` must be even with `1 < overlap < size`; paragraphs are split
/// greedily into interiors of at most `size - overlap` runes, then padded
/// with up to `overlap / 2` context runes on each side.
pub fn chunk_paragraphs(
    paragraphs: &[&str],
    size: usize,
    overlap: usize,
) -> Result<Vec<ChunkWindow>, AppError> {
    validate_params(size, overlap)?;

    let half = overlap / 2;
    let interior_max = size - overlap;

    let total: usize = paragraphs.iter().map(|p| p.chars().count()).sum();

    let mut windows = Vec::new();
    let mut paragraph_start = 0usize;

    for paragraph in paragraphs {
        let len = paragraph.chars().count();

        let mut piece_start = 0usize;
        while piece_start < len {
            let piece_end = (piece_start + interior_max).min(len);
            let a = paragraph_start + piece_start;
            let b = paragraph_start + piece_end;

            let start = a.saturating_sub(half);
            let end = (b + half).min(total);

            windows.push(window(start, a - start, b - start, end)?);
            piece_start = piece_end;
        }

        paragraph_start += len;
    }

    Ok(windows)
}

fn validate_params(size: usize, overlap: usize) -> Result<(), AppError> {
    if size == 0 {
        return Err(AppError::Validation("chunk size must be positive".into()));
    }
    if overlap % 2 != 0 {
        return Err(AppError::Validation(format!(
            "chunk overlap {overlap} must be even"
        )));
    }
    if overlap <= 1 || overlap >= size {
        return Err(AppError::Validation(format!(
            "chunk overlap {overlap} must satisfy 1 < overlap < size ({size})"
        )));
    }
    Ok(())
}

fn window(
    start: usize,
    offset_left: usize,
    offset_right: usize,
    end: usize,
) -> Result<ChunkWindow, AppError> {
    let index = |value: usize| {
        i32::try_from(value)
            .map_err(|_| AppError::Validation(format!("rune index {value} exceeds i32 range")))
    };

    Ok(ChunkWindow {
        start: index(start)?,
        offset_left: index(offset_left)?,
        offset_right: index(offset_right)?,
        end: index(end)?,
    })
}

/// Extract the padded text of a window, `[start, end)` in runes.
pub fn window_text(content: &str, window: &ChunkWindow) -> String {
    let start = usize::try_from(window.start).unwrap_or(0);
    let end = usize::try_from(window.end).unwrap_or(0);
    content
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}
