//! Printer-agnostic document model.
//!
//! A [`Document`] is an ordered list of content blocks. It carries styling
//! intent (alignment, weight, nominal size) but no physical layout; the
//! ESC/POS and HTML renderers decide how each block maps onto a device.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// Text styling. `size` is the nominal CSS pixel size the layout was
/// designed at; thermal renderers bucket it into character multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStyle {
    pub align: Align,
    pub bold: bool,
    pub size: u8,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            align: Align::Left,
            bold: false,
            size: 13,
        }
    }
}

impl TextStyle {
    pub fn new(align: Align, size: u8) -> Self {
        Self {
            align,
            bold: false,
            size,
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }
}

/// One cell of a table row. An empty value is a deliberate blank column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub value: String,
    pub style: TextStyle,
}

impl Cell {
    pub fn new(value: impl Into<String>, style: TextStyle) -> Self {
        Self {
            value: value.into(),
            style,
        }
    }

    pub fn left(value: impl Into<String>) -> Self {
        Self::new(value, TextStyle::new(Align::Left, 13))
    }

    pub fn right(value: impl Into<String>) -> Self {
        Self::new(value, TextStyle::new(Align::Right, 13))
    }

    pub fn empty() -> Self {
        Self::new("", TextStyle::new(Align::Left, 8))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symbology {
    #[default]
    Qr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Text {
        value: String,
        style: TextStyle,
    },
    /// Raster image; `reference` is a local file path.
    Image {
        reference: String,
        /// Relative width hint, e.g. `"80vw"`.
        width: Option<String>,
        align: Align,
    },
    Table {
        header: Vec<Cell>,
        body: Vec<Vec<Cell>>,
        footer: Vec<Cell>,
    },
    Code {
        payload: String,
        symbology: Symbology,
        align: Align,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, value: impl Into<String>, style: TextStyle) -> &mut Self {
        self.blocks.push(Block::Text {
            value: value.into(),
            style,
        });
        self
    }

    pub fn image(&mut self, reference: impl Into<String>, width: Option<&str>) -> &mut Self {
        self.blocks.push(Block::Image {
            reference: reference.into(),
            width: width.map(str::to_string),
            align: Align::Center,
        });
        self
    }

    pub fn table(&mut self, header: Vec<Cell>, body: Vec<Vec<Cell>>, footer: Vec<Cell>) -> &mut Self {
        self.blocks.push(Block::Table {
            header,
            body,
            footer,
        });
        self
    }

    pub fn code(&mut self, payload: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Code {
            payload: payload.into(),
            symbology: Symbology::Qr,
            align: Align::Center,
        });
        self
    }

    /// Values of the top-level text blocks, in order.
    pub fn texts(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Body rows of the first table block, as plain strings.
    pub fn table_rows(&self) -> Vec<Vec<&str>> {
        self.blocks
            .iter()
            .find_map(|b| match b {
                Block::Table { body, .. } => Some(
                    body.iter()
                        .map(|row| row.iter().map(|c| c.value.as_str()).collect())
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
