//! Commerce and timeclock records handed to the bridge by the POS frontend
//! and the timeclock notification channel.
//!
//! The frontend ships loosely-typed JSON (numbers as strings, tags as either a
//! comma list or an array, timestamps with or without offsets), so the serde
//! impls here are deliberately lenient and default every optional field.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Receipt inputs
// ---------------------------------------------------------------------------

/// A single order line as sent by the checkout screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub quantity: u32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, alias = "full_price")]
    pub full_price: Option<Decimal>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Vec<Property>,
}

impl LineItem {
    /// Unit price shown on the receipt: an explicit non-zero full price wins
    /// over the line price, falling back to zero.
    pub fn unit_price(&self) -> Decimal {
        self.full_price
            .filter(|p| !p.is_zero())
            .or(self.price.filter(|p| !p.is_zero()))
            .unwrap_or_default()
    }
}

/// Line-item customisation ("Size: Large", "Mod: no onions").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, alias = "add_price")]
    pub add_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, deserialize_with = "lenient_string")]
    pub gateway: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl Transaction {
    pub fn is_change(&self) -> bool {
        self.kind.as_deref() == Some("change")
    }

    pub fn amount(&self) -> Decimal {
        self.amount.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    FixedAmount,
    Percentage,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscountCode {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(rename = "type", default)]
    pub kind: DiscountKind,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
}

impl Customer {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Display name, `None` without a first name.
    pub fn display_name(&self) -> Option<String> {
        let first = self.first_name.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        match self.last_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(last) => Some(format!("{first} {last}")),
            None => Some(first.to_string()),
        }
    }
}

/// Everything a customer receipt is compiled from. This is also the unit the
/// reprint cache retains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptInput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub order: Vec<LineItem>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transactions: Vec<Transaction>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub order_number: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub order_id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tax: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub discount_codes: Vec<DiscountCode>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subtotal_price: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_price: Decimal,
    #[serde(default)]
    pub customer: Option<Customer>,
}

// ---------------------------------------------------------------------------
// Kitchen tickets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KdsItem {
    #[serde(default, alias = "name", deserialize_with = "lenient_string")]
    pub item_name: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub quantity: u32,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KdsOrder {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub order_number: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<KdsItem>,
}

// ---------------------------------------------------------------------------
// Timeclock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockEntry {
    pub id: i64,
    #[serde(deserialize_with = "timestamp")]
    pub clock_in: DateTime<Utc>,
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub clock_out: Option<DateTime<Utc>>,
}

/// Parse an RFC 3339 timestamp; offset-less values (Postgres `timestamp`
/// columns serialised through `row_to_json`) are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(value_to_string(Value::deserialize(d)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(value_to_string(Value::deserialize(d)?).filter(|s| !s.trim().is_empty()))
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    lenient_u64(d).map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn lenient_tags<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(value_to_string)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(d)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
    }
}
