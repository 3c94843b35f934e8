//! Synthetic pages and OCR payloads shared by the assessment tests.

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

use super::types::{OcrBox, OcrPageResponse, OcrSymbol, OcrWord, PageRaster};

/// Off-white paper tone used by synthetic pages. Light enough that blank
/// rows stay under the line projection threshold.
pub const PAPER: u8 = 245;

pub fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .unwrap();
    cursor.into_inner()
}

pub fn blank(width: u32, height: u32, value: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
}

pub fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
    for py in y..(y + h).min(img.height()) {
        for px in x..(x + w).min(img.width()) {
            img.put_pixel(px, py, Rgba([value, value, value, 255]));
        }
    }
}

/// Draw a band of vertical ink strokes: `stroke` px wide, repeating every `period` px.
pub fn stroke_band(img: &mut RgbaImage, top: u32, height: u32, stroke: u32, period: u32) {
    let margin = 20.min(img.width() / 4);
    let mut x = margin;
    while x + stroke <= img.width() - margin {
        fill_rect(img, x, top, stroke, height, 0);
        x += period;
    }
}

/// A page of `rows` written lines, each `line_h` px tall with `gap` px between.
pub fn written_page(width: u32, rows: u32, line_h: u32, gap: u32) -> RgbaImage {
    written_page_on(PAPER, width, rows, line_h, gap)
}

/// `written_page` on a given paper tone.
pub fn written_page_on(paper: u8, width: u32, rows: u32, line_h: u32, gap: u32) -> RgbaImage {
    let height = gap + rows * (line_h + gap);
    let mut img = blank(width, height, paper);
    for i in 0..rows {
        stroke_band(&mut img, gap + i * (line_h + gap), line_h, 3, 6);
    }
    img
}

/// Separable box blur with the given radius.
pub fn box_blur(img: &RgbaImage, radius: u32) -> RgbaImage {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let r = radius as i64;
    let mut horizontal = img.clone();
    for y in 0..h {
        for x in 0..w {
            let mut sum = [0u32; 3];
            let mut n = 0u32;
            for dx in -r..=r {
                let sx = (x + dx).clamp(0, w - 1);
                let p = img.get_pixel(sx as u32, y as u32).0;
                for c in 0..3 {
                    sum[c] += p[c] as u32;
                }
                n += 1;
            }
            horizontal.put_pixel(
                x as u32,
                y as u32,
                Rgba([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8, 255]),
            );
        }
    }
    let mut out = horizontal.clone();
    for y in 0..h {
        for x in 0..w {
            let mut sum = [0u32; 3];
            let mut n = 0u32;
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, h - 1);
                let p = horizontal.get_pixel(x as u32, sy as u32).0;
                for c in 0..3 {
                    sum[c] += p[c] as u32;
                }
                n += 1;
            }
            out.put_pixel(
                x as u32,
                y as u32,
                Rgba([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8, 255]),
            );
        }
    }
    out
}

pub fn raster(img: RgbaImage) -> PageRaster {
    PageRaster::new(0, img)
}

pub fn ocr_box(x: f32, y: f32, width: f32, height: f32) -> OcrBox {
    OcrBox {
        x,
        y,
        width,
        height,
    }
}

/// A word whose symbols are laid out left to right inside `bbox`.
pub fn ocr_word(text: &str, confidence: f32, bbox: OcrBox) -> OcrWord {
    let count = text.chars().count().max(1) as f32;
    let sym_w = bbox.width / count;
    let symbols = text
        .chars()
        .enumerate()
        .map(|(i, c)| OcrSymbol {
            text: c.to_string(),
            confidence,
            bbox: ocr_box(bbox.x + i as f32 * sym_w, bbox.y, sym_w, bbox.height),
        })
        .collect();
    OcrWord {
        text: text.to_string(),
        confidence,
        bbox,
        symbols,
    }
}

/// OCR response placing each text on its own row band, matching `written_page` geometry.
pub fn ocr_for_rows(texts: &[&str], confidence: f32, line_h: u32, gap: u32) -> OcrPageResponse {
    let mut words = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let top = (gap + i as u32 * (line_h + gap)) as f32;
        let mut x = 20.0;
        for word in text.split_whitespace() {
            let w = 12.0 * word.chars().count() as f32;
            words.push(ocr_word(word, confidence, ocr_box(x, top, w, line_h as f32)));
            x += w + 10.0;
        }
    }
    OcrPageResponse {
        text: texts.join("\n"),
        words,
    }
}
