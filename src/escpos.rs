//! ESC/POS output for network thermal printers.
//!
//! [`EscPosBuilder`] assembles raw command bytes; [`render_document`] walks a
//! [`Document`] and lays each block out for the paper width. Text is sent as
//! plain ASCII (anything else prints as `?`), images as GS v 0 rasters and
//! codes as native QR symbols.

use image::imageops::FilterType;
use tracing::warn;

use crate::document::{Align, Block, Cell, Document, TextStyle};

// ESC/POS command bytes
const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Tallest logo raster, in dots.
const MAX_RASTER_HEIGHT: u32 = 220;
/// Luma below this prints black.
const RASTER_THRESHOLD: u8 = 160;

/// Paper width in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 48,
        }
    }

    /// Printable width in dots at 203 dpi.
    pub fn dots(self) -> u32 {
        match self {
            PaperWidth::Mm58 => 384,
            PaperWidth::Mm80 => 576,
        }
    }

    pub fn mm(self) -> u32 {
        match self {
            PaperWidth::Mm58 => 58,
            PaperWidth::Mm80 => 80,
        }
    }
}

/// Builder for ESC/POS command buffers.
///
/// ```rust,ignore
/// let mut b = EscPosBuilder::new();
/// b.init().center().bold(true).text("RECEIPT").lf().bold(false).feed(3).cut();
/// let data = b.build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            paper: PaperWidth::Mm80,
        }
    }

    pub fn with_paper(mut self, paper: PaperWidth) -> Self {
        self.paper = paper;
        self
    }

    // -----------------------------------------------------------------------
    // Formatting
    // -----------------------------------------------------------------------

    /// ESC @: Initialize printer, reset to defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// ESC E n: Bold on/off.
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x45, u8::from(on)]);
        self
    }

    /// GS ! n: Set text size (width × height multiplier, 1–8 each).
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    pub fn normal_size(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    /// ESC a n
    pub fn align(&mut self, align: Align) -> &mut Self {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        self.buffer.extend_from_slice(&[ESC, 0x61, n]);
        self
    }

    pub fn left(&mut self) -> &mut Self {
        self.align(Align::Left)
    }

    pub fn center(&mut self) -> &mut Self {
        self.align(Align::Center)
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Append text as ASCII. Zero-width spaces are dropped, other non-ASCII
    /// characters print as `?`.
    pub fn text(&mut self, s: &str) -> &mut Self {
        for ch in s.chars() {
            match ch {
                '\u{200B}' => {}
                c if c.is_ascii() => self.buffer.push(c as u8),
                _ => self.buffer.push(b'?'),
            }
        }
        self
    }

    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    /// One line of fixed-width columns. Cells are padded or truncated to
    /// their column width and aligned within it.
    pub fn columns(&mut self, cells: &[(&str, usize, Align)]) -> &mut Self {
        let mut line = String::new();
        for (value, width, align) in cells {
            line.push_str(&fit(value, *width, *align));
        }
        self.text(line.trim_end()).lf()
    }

    /// GS v 0: Print a packed 1-bit raster, `width_bytes` × 8 dots wide.
    pub fn raster_image(&mut self, width_bytes: u16, height: u16, data: &[u8]) -> &mut Self {
        let [xl, xh] = width_bytes.to_le_bytes();
        let [yl, yh] = height.to_le_bytes();
        self.buffer
            .extend_from_slice(&[GS, 0x76, 0x30, 0x00, xl, xh, yl, yh]);
        self.buffer.extend_from_slice(data);
        self
    }

    /// GS ( k: QR code, model 2, error correction L, module `size` 1–16.
    pub fn qr_code(&mut self, data: &str, size: u8) -> &mut Self {
        let size = size.clamp(1, 16);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, size]);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x30]);
        let payload = data.as_bytes();
        let [pl, ph] = u16::try_from(payload.len() + 3)
            .unwrap_or(u16::MAX)
            .to_le_bytes();
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, pl, ph, 0x31, 0x50, 0x30]);
        self.buffer.extend_from_slice(payload);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
        self
    }

    // -----------------------------------------------------------------------
    // Feed / cut
    // -----------------------------------------------------------------------

    /// ESC d n: Feed n lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16: Partial cut with 16-dot feed.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x41, 0x10]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

fn fit(value: &str, width: usize, align: Align) -> String {
    let value: String = value.chars().filter(|c| *c != '\u{200B}').take(width).collect();
    let len = value.chars().count();
    match align {
        Align::Left => format!("{value:<width$}"),
        Align::Right => format!("{value:>width$}"),
        Align::Center => {
            let left = (width - len) / 2;
            format!("{}{value}{}", " ".repeat(left), " ".repeat(width - len - left))
        }
    }
}

// ---------------------------------------------------------------------------
// Document rendering
// ---------------------------------------------------------------------------

/// Character multipliers for a nominal pixel size.
fn size_multiplier(size: u8) -> (u8, u8) {
    if size >= 25 {
        (2, 2)
    } else if size >= 18 {
        (1, 2)
    } else {
        (1, 1)
    }
}

/// Render `doc` to a complete print job: init, every block, feed and cut.
pub fn render_document(doc: &Document, paper: PaperWidth) -> Vec<u8> {
    let mut b = EscPosBuilder::new().with_paper(paper);
    b.init();
    for block in &doc.blocks {
        match block {
            Block::Text { value, style } => render_text(&mut b, value, style),
            Block::Image {
                reference, align, ..
            } => match std::fs::read(reference)
                .map_err(|e| e.to_string())
                .and_then(|bytes| rasterize(&bytes, paper))
            {
                Ok((width_bytes, height, packed)) => {
                    b.align(*align)
                        .raster_image(width_bytes, height, &packed)
                        .lf()
                        .left();
                }
                Err(e) => warn!(image = %reference, error = %e, "skipping image block"),
            },
            Block::Table {
                header,
                body,
                footer,
            } => render_table(&mut b, header, body, footer),
            Block::Code { payload, align, .. } => {
                b.align(*align).qr_code(payload, 6).lf().left();
            }
        }
    }
    b.feed(4).cut();
    b.build()
}

fn render_text(b: &mut EscPosBuilder, value: &str, style: &TextStyle) {
    let (w, h) = size_multiplier(style.size);
    b.align(style.align).bold(style.bold).text_size(w, h);
    for line in value.split('\n') {
        b.text(line).lf();
    }
    b.normal_size().bold(false).left();
}

fn render_table(
    b: &mut EscPosBuilder,
    header: &[Cell],
    body: &[Vec<Cell>],
    footer: &[Cell],
) {
    if !header.is_empty() {
        let title: Vec<&str> = header.iter().map(|c| c.value.as_str()).collect();
        b.center().bold(true).text_size(2, 2);
        b.text(&title.join(" ")).lf();
        b.normal_size().bold(false).left();
    }

    let total = b.paper.chars();
    let (first, last) = (4, 11);
    let middle = total.saturating_sub(first + last);
    for row in body {
        let cell = |i: usize| row.get(i).map(|c| c.value.as_str()).unwrap_or("");
        let align = |i: usize| row.get(i).map(|c| c.style.align).unwrap_or_default();
        let wrapped = wrap(cell(1), middle);
        for (n, chunk) in wrapped.iter().enumerate() {
            let (lead, tail) = if n == 0 { (cell(0), cell(2)) } else { ("", "") };
            b.columns(&[
                (lead, first, align(0)),
                (chunk.as_str(), middle, align(1)),
                (tail, last, Align::Right),
            ]);
        }
    }

    if footer.iter().any(|c| !c.value.is_empty()) {
        let text: Vec<&str> = footer.iter().map(|c| c.value.as_str()).collect();
        b.text(&text.join(" ")).lf();
    }
}

/// Split on character count; always yields at least one (possibly empty) chunk.
fn wrap(value: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() || width == 0 {
        return vec![String::new()];
    }
    chars.chunks(width).map(|c| c.iter().collect()).collect()
}

/// Decode, scale to paper width and pack an image as a 1-bit raster.
/// Returns `(width_bytes, height, packed)`.
pub fn rasterize(image_bytes: &[u8], paper: PaperWidth) -> Result<(u16, u16, Vec<u8>), String> {
    let decoded = image::load_from_memory(image_bytes).map_err(|e| format!("image decode: {e}"))?;
    let gray = decoded.to_luma8();
    let (src_w, src_h) = gray.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err("image has invalid dimensions".to_string());
    }

    let mut target_w = src_w.min(paper.dots()).max(1);
    let mut target_h = ((src_h as f32 * (target_w as f32 / src_w as f32)).round() as u32).max(1);
    if target_h > MAX_RASTER_HEIGHT {
        target_h = MAX_RASTER_HEIGHT;
        target_w = ((src_w as f32 * (target_h as f32 / src_h as f32)).round() as u32).max(1);
    }
    let resized = if (target_w, target_h) != (src_w, src_h) {
        image::imageops::resize(&gray, target_w, target_h, FilterType::Triangle)
    } else {
        gray
    };

    let (width, height) = resized.dimensions();
    let width_bytes = width.div_ceil(8);
    let mut packed = Vec::with_capacity((width_bytes * height) as usize);
    for y in 0..height {
        for xb in 0..width_bytes {
            let mut byte = 0u8;
            for bit in 0..8u32 {
                let x = xb * 8 + bit;
                if x < width && resized.get_pixel(x, y).0[0] < RASTER_THRESHOLD {
                    byte |= 0x80 >> bit;
                }
            }
            packed.push(byte);
        }
    }
    Ok((width_bytes as u16, height as u16, packed))
}
