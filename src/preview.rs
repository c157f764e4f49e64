//! "Preview Mode" output: documents rendered to standalone HTML files.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use chrono::Utc;

use crate::document::{Align, Block, Cell, Document, TextStyle};
use crate::error::BridgeResult;

pub const PREVIEWS_DIR: &str = "previews";

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn html_shell(title: &str, page_width_mm: u32, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<title>{}</title>
<style>
body {{ font-family: Calibri, ui-sans-serif, sans-serif; margin: 0 auto; padding: 5px; width: {}mm; background: #fff; color: #111; }}
.t {{ margin: 0; white-space: pre-wrap; }}
table {{ width: 95%; border-collapse: collapse; font-size: 13px; }}
td, th {{ padding: 0; border: 0; }}
img {{ display: block; margin: 0 auto; }}
.qr {{ font-family: ui-monospace, monospace; font-size: 10px; text-align: center; border: 1px dashed #111; padding: 6px; }}
</style>
</head>
<body>{}</body>
</html>"#,
        esc(title),
        page_width_mm,
        body
    )
}

fn align_css(align: Align) -> &'static str {
    match align {
        Align::Left => "left",
        Align::Center => "center",
        Align::Right => "right",
    }
}

fn style_attr(style: &TextStyle) -> String {
    format!(
        "text-align:{};font-size:{}px;font-weight:{}",
        align_css(style.align),
        style.size,
        if style.bold { "bold" } else { "400" }
    )
}

fn cells_html(tag: &str, cells: &[Cell]) -> String {
    let mut row = String::from("<tr>");
    for cell in cells {
        row.push_str(&format!(
            "<{tag} style=\"{}\">{}</{tag}>",
            style_attr(&cell.style),
            esc(&cell.value)
        ));
    }
    row.push_str("</tr>");
    row
}

/// Inline the image as a data URL so the preview file is self-contained.
fn image_src(reference: &str) -> String {
    match std::fs::read(reference) {
        Ok(bytes) => {
            let mime = if reference.to_ascii_lowercase().ends_with(".png") {
                "image/png"
            } else {
                "image/jpeg"
            };
            format!(
                "data:{mime};base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            )
        }
        Err(_) => esc(reference),
    }
}

pub fn render_html(doc: &Document, title: &str, page_width_mm: u32) -> String {
    let mut body = String::new();
    for block in &doc.blocks {
        match block {
            Block::Text { value, style } => body.push_str(&format!(
                "<p class=\"t\" style=\"{}\">{}</p>",
                style_attr(style),
                esc(value)
            )),
            Block::Image {
                reference, width, ..
            } => body.push_str(&format!(
                "<img src=\"{}\" style=\"width:{}\"/>",
                image_src(reference),
                esc(width.as_deref().unwrap_or("auto"))
            )),
            Block::Table {
                header,
                body: rows,
                footer,
            } => {
                body.push_str("<table><thead>");
                body.push_str(&cells_html("th", header));
                body.push_str("</thead><tbody>");
                for row in rows {
                    body.push_str(&cells_html("td", row));
                }
                body.push_str("</tbody><tfoot>");
                body.push_str(&cells_html("td", footer));
                body.push_str("</tfoot></table>");
            }
            Block::Code { payload, .. } => body.push_str(&format!(
                "<div class=\"qr\">QR<br/>{}</div>",
                esc(payload)
            )),
        }
    }
    html_shell(title, page_width_mm, &body)
}

/// Write a rendered preview under `data_dir/previews/` and return its path.
pub fn write_preview_file(data_dir: &Path, label: &str, html: &str) -> BridgeResult<PathBuf> {
    let dir = data_dir.join(PREVIEWS_DIR);
    std::fs::create_dir_all(&dir)?;
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let file = dir.join(format!(
        "{label}_{}_{}.html",
        Utc::now().format("%Y%m%d_%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    ));
    std::fs::write(&file, html)?;
    Ok(file)
}
