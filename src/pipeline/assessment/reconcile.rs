//! Maps OCR words onto detected lines.
//!
//! Every word lands on exactly one line: the line whose vertical span holds
//! the word's center with the largest overlap, or else the line with the
//! nearest center. Words are never dropped.

use super::confidence::mean_confidence;
use super::types::{
    BoundingBox, CharacterObservation, DetectedLine, ExtractedLine, OcrPageResponse, OcrWord,
};

/// Lines extracted from one page, plus whether the OCR call itself failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLines {
    pub page_index: usize,
    pub lines: Vec<ExtractedLine>,
    /// Upstream error detail when the provider call failed.
    pub ocr_failure: Option<String>,
}

impl PageLines {
    /// Reconcile a successful OCR response. Global indices start at `first_line_index`.
    pub fn from_response(
        page_index: usize,
        first_line_index: usize,
        detected: &[DetectedLine],
        response: &OcrPageResponse,
        page_size: (u32, u32),
    ) -> Self {
        Self {
            page_index,
            lines: reconcile_page(page_index, first_line_index, detected, response, page_size),
            ocr_failure: None,
        }
    }

    /// Keep the detected geometry with no text so later stages still see the lines.
    pub fn from_failure(
        page_index: usize,
        first_line_index: usize,
        detected: &[DetectedLine],
        error: String,
    ) -> Self {
        let lines = detected
            .iter()
            .enumerate()
            .map(|(i, line)| empty_line(first_line_index + i, page_index, line.bbox))
            .collect();
        Self {
            page_index,
            lines,
            ocr_failure: Some(error),
        }
    }
}

pub fn reconcile_page(
    page_index: usize,
    first_line_index: usize,
    detected: &[DetectedLine],
    response: &OcrPageResponse,
    (page_w, page_h): (u32, u32),
) -> Vec<ExtractedLine> {
    let owned_fallback;
    let detected = if detected.is_empty() {
        owned_fallback = [DetectedLine {
            line_index: 0,
            bbox: BoundingBox::new(0, 0, page_w, page_h),
            baseline: page_h / 2,
            confidence: 0.0,
        }];
        &owned_fallback[..]
    } else {
        detected
    };

    let mut lines: Vec<ExtractedLine> = detected
        .iter()
        .enumerate()
        .map(|(i, line)| empty_line(first_line_index + i, page_index, line.bbox))
        .collect();
    let mut words_per_line: Vec<Vec<String>> = vec![Vec::new(); lines.len()];

    for word in &response.words {
        let slot = assign_line(word, detected);
        let line = &mut lines[slot];
        let text = word.display_text();
        if !text.trim().is_empty() {
            words_per_line[slot].push(text);
        }
        line.characters.extend(word_characters(word, line.line_index, page_index, page_w, page_h));
    }

    for (line, words) in lines.iter_mut().zip(words_per_line) {
        line.text = words.join(" ");
        line.confidence = mean_confidence(&line.characters);
    }

    lines
}

fn empty_line(line_index: usize, page_index: usize, bbox: BoundingBox) -> ExtractedLine {
    ExtractedLine {
        line_index,
        page_index,
        text: String::new(),
        confidence: 0.0,
        bbox,
        characters: Vec::new(),
    }
}

/// Index into `detected` of the line that owns this word.
fn assign_line(word: &OcrWord, detected: &[DetectedLine]) -> usize {
    let center = word.bbox.center_y();
    let word_top = word.bbox.y;
    let word_bottom = word.bbox.y + word.bbox.height;

    let mut best_containing: Option<(usize, f32)> = None;
    for (i, line) in detected.iter().enumerate() {
        let top = line.bbox.y as f32;
        let bottom = line.bbox.bottom() as f32;
        if center < top || center >= bottom {
            continue;
        }
        let overlap = (word_bottom.min(bottom) - word_top.max(top)).max(0.0);
        if best_containing.map_or(true, |(_, best)| overlap > best) {
            best_containing = Some((i, overlap));
        }
    }
    if let Some((i, _)) = best_containing {
        return i;
    }

    let mut nearest = 0;
    let mut nearest_distance = f32::INFINITY;
    for (i, line) in detected.iter().enumerate() {
        let distance = (line.bbox.center_y() - center).abs();
        if distance < nearest_distance {
            nearest = i;
            nearest_distance = distance;
        }
    }
    nearest
}

/// One observation per symbol. A word without symbols counts as one observation.
fn word_characters(
    word: &OcrWord,
    line_index: usize,
    page_index: usize,
    page_w: u32,
    page_h: u32,
) -> Vec<CharacterObservation> {
    if word.symbols.is_empty() {
        let text = word.display_text();
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![CharacterObservation {
            text,
            confidence: word.confidence.clamp(0.0, 1.0),
            bbox: word.bbox.to_page_box(page_w, page_h),
            line_index,
            page_index,
        }];
    }

    word.symbols
        .iter()
        .map(|symbol| CharacterObservation {
            text: symbol.text.clone(),
            confidence: symbol.confidence.clamp(0.0, 1.0),
            bbox: symbol.bbox.to_page_box(page_w, page_h),
            line_index,
            page_index,
        })
        .collect()
}
