//! Document compiler: pure functions turning commerce and timeclock records
//! into [`Document`](crate::document::Document)s.
//!
//! Nothing in here touches the clock, the settings store or the network. The
//! print timestamp and branding are parameters, so compiling the same inputs
//! twice yields identical documents.

mod kitchen;
mod receipt;
mod timeclock;

pub use kitchen::{compile_kds_ticket, MIN_TICKET_LINES};
pub use receipt::{compile_receipt, discount_values};
pub use timeclock::{compile_timeclock_receipt, format_duration};

use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};

/// Zero-width space. Reserves a printed line without visible content.
pub const SPACER: &str = "\u{200B}";

/// Fixed store branding printed on customer-facing documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Branding {
    pub logo_path: String,
    pub store_address: String,
    pub terms: String,
    pub time_zone: Tz,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            logo_path: "images/longlogo.png".into(),
            store_address: "1218 N Camp St\nSeguin, TX 78155\n\n".into(),
            terms: "Terms of Admission: https://zdtamusement.com/pages/terms".into(),
            time_zone: chrono_tz::America::Chicago,
        }
    }
}

fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `$12.50`, or `($12.50)` for negative amounts.
pub fn signed_money(value: Decimal) -> String {
    let cents = round_cents(value);
    if cents.is_sign_negative() && !cents.is_zero() {
        format!("(${:.2})", cents.abs())
    } else {
        format!("${:.2}", cents.abs())
    }
}

/// `($12.50)` regardless of sign, for amounts that always read as deductions.
pub fn deducted_money(value: Decimal) -> String {
    format!("(${:.2})", round_cents(value).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_signed_money() {
        assert_eq!(signed_money(dec("12.5")), "$12.50");
        assert_eq!(signed_money(dec("-3")), "($3.00)");
        assert_eq!(signed_money(Decimal::ZERO), "$0.00");
        assert_eq!(signed_money(dec("2.345")), "$2.35");
        assert_eq!(signed_money(dec("-0.001")), "$0.00");
    }

    #[test]
    fn test_deducted_money() {
        assert_eq!(deducted_money(dec("5")), "($5.00)");
        assert_eq!(deducted_money(dec("-5")), "($5.00)");
        assert_eq!(deducted_money(Decimal::ZERO), "($0.00)");
    }
}
