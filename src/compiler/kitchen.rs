use chrono::{DateTime, FixedOffset};

use super::SPACER;
use crate::document::{Align, Document, TextStyle};
use crate::models::{KdsItem, KdsOrder};

/// Item and instruction lines are padded up to this count so every ticket
/// tears off at the same length.
pub const MIN_TICKET_LINES: usize = 6;

const SEPARATOR: &str = "-----------------------------";

pub fn compile_kds_ticket(order: &KdsOrder, printed_at: DateTime<FixedOffset>) -> Document {
    let mut doc = Document::new();
    let heading = TextStyle::new(Align::Center, 30).bold();

    let title = order
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| order.order_number.as_ref().map(|n| format!("Order #{n}")))
        .unwrap_or_else(|| SPACER.to_string());
    doc.text(title, heading);
    doc.text(SEPARATOR, heading);

    let mut lines = 0;
    for item in &order.items {
        doc.text(item_line(item), TextStyle::new(Align::Left, 25).bold());
        lines += 1;
        for instruction in instructions(item) {
            doc.text(format!("   {instruction}"), TextStyle::new(Align::Left, 25));
            lines += 1;
        }
    }
    while lines < MIN_TICKET_LINES {
        doc.text(SPACER, TextStyle::new(Align::Center, 25));
        lines += 1;
    }

    doc.text(
        printed_at.format("%B %-d, %Y, %I:%M:%S %p").to_string(),
        TextStyle::new(Align::Center, 10).bold(),
    );
    doc
}

fn item_line(item: &KdsItem) -> String {
    if item.quantity > 1 {
        format!("{} x {}", item.item_name, item.quantity)
    } else {
        item.item_name.clone()
    }
}

/// `"Temp: Medium, Side: Fries, extra napkins"` → `["Medium", "Fries", "extra napkins"]`.
fn instructions(item: &KdsItem) -> Vec<String> {
    let Some(raw) = item.special_instructions.as_deref().filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    raw.split(',')
        .map(|fragment| {
            fragment
                .split_once(':')
                .map(|(_, value)| value.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(fragment)
                .to_string()
        })
        .collect()
}
