use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;

use super::{deducted_money, signed_money, Branding};
use crate::document::{Align, Cell, Document, TextStyle};
use crate::models::{DiscountCode, DiscountKind, LineItem, ReceiptInput, Transaction};

const TAB_GATEWAY: &str = "Tab";
const EMPLOYEE_TAG: &str = "employee";

/// Compile a customer receipt.
///
/// Totals, tax and subtotal come from the caller and are printed as given;
/// only the discount rows are derived here, from the line prices.
pub fn compile_receipt(
    input: &ReceiptInput,
    branding: &Branding,
    printed_at: DateTime<FixedOffset>,
) -> Document {
    let mut doc = Document::new();

    if let Some(name) = name_header(input) {
        doc.text(name, TextStyle::new(Align::Center, 30));
    }
    doc.image(&branding.logo_path, Some("80vw"));
    doc.text(&branding.store_address, TextStyle::new(Align::Center, 15));

    let mut body = Vec::new();
    for item in &input.order {
        item_rows(item, &mut body);
    }

    let values = discount_values(pre_discount_subtotal(&input.order), &input.discount_codes);
    for (discount, value) in input.discount_codes.iter().zip(values) {
        body.push(summary_row(&discount.code, deducted_money(value)));
    }

    body.push(summary_row("SUBTOTAL", signed_money(input.subtotal_price)));
    body.push(summary_row("TAX", signed_money(input.total_tax)));
    body.push(summary_row("TOTAL", signed_money(input.total_price)));

    for transaction in &input.transactions {
        body.push(transaction_row(transaction));
    }

    let header = vec![
        Cell::new("#", TextStyle::new(Align::Right, 15)),
        Cell::new(last_three(&input.order_number), TextStyle::new(Align::Left, 15)),
    ];
    doc.table(header, body, vec![Cell::empty(), Cell::empty(), Cell::empty()]);

    let footer = TextStyle::new(Align::Center, 12);
    doc.text(&branding.terms, footer);
    doc.text(format!("REF#{}", input.order_number), footer);
    doc.text(printed_at.format("%B %-d, %Y %-I:%M:%S %p").to_string(), footer);
    doc
}

/// Customer name line, printed for house tabs and staff purchases.
fn name_header(input: &ReceiptInput) -> Option<String> {
    let customer = input.customer.as_ref()?;
    let tab_total: Decimal = input
        .transactions
        .iter()
        .filter(|t| t.gateway == TAB_GATEWAY)
        .map(Transaction::amount)
        .sum();
    if tab_total > Decimal::ZERO || customer.has_tag(EMPLOYEE_TAG) {
        customer.display_name()
    } else {
        None
    }
}

fn item_rows(item: &LineItem, body: &mut Vec<Vec<Cell>>) {
    let unit = item.unit_price();
    let quantity = Decimal::from(item.quantity);
    body.push(vec![
        Cell::left(item.quantity.to_string()),
        Cell::left(format!("{} @{}", item.title, signed_money(unit))),
        Cell::right(signed_money(unit * quantity)),
    ]);

    for property in &item.properties {
        let label = if property.name.to_lowercase().contains("mod") {
            format!("  {}", property.value)
        } else {
            format!("  {}: {}", property.name, property.value)
        };
        let amount = match property.add_price {
            Some(add) if !add.is_zero() && item.quantity > 0 => {
                let scaled = add.abs() * quantity;
                Cell::right(signed_money(if add.is_sign_negative() { -scaled } else { scaled }))
            }
            _ => Cell::right(""),
        };
        body.push(vec![Cell::empty(), Cell::left(label), amount]);
    }
}

/// Sum of quantity × line price over the lines that carry both.
fn pre_discount_subtotal(order: &[LineItem]) -> Decimal {
    order
        .iter()
        .filter_map(|item| {
            let price = item.price.filter(|p| !p.is_zero())?;
            (item.quantity > 0).then(|| Decimal::from(item.quantity) * price)
        })
        .sum()
}

/// Deduction for each discount code, in input order. Percentages are taken
/// from `pre_discount` so stacked codes never compound.
pub fn discount_values(pre_discount: Decimal, discounts: &[DiscountCode]) -> Vec<Decimal> {
    discounts
        .iter()
        .map(|d| {
            let amount = d.amount.unwrap_or_default();
            match d.kind {
                DiscountKind::FixedAmount => amount,
                DiscountKind::Percentage => pre_discount * amount / Decimal::ONE_HUNDRED,
                DiscountKind::Unknown => Decimal::ZERO,
            }
        })
        .collect()
}

fn summary_row(label: &str, amount: String) -> Vec<Cell> {
    vec![
        Cell::empty(),
        Cell::new(label, TextStyle::new(Align::Right, 10)),
        Cell::right(amount),
    ]
}

fn transaction_row(transaction: &Transaction) -> Vec<Cell> {
    if transaction.is_change() {
        summary_row("Change Due", deducted_money(transaction.amount()))
    } else {
        summary_row(&transaction.gateway, signed_money(transaction.amount()))
    }
}

fn last_three(order_number: &str) -> String {
    let chars: Vec<char> = order_number.chars().collect();
    chars[chars.len().saturating_sub(3)..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Block;
    use crate::models::{Customer, Property};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn printed_at() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-10-19T15:04:05-05:00").unwrap()
    }

    fn line(qty: u32, title: &str, price: &str) -> LineItem {
        LineItem {
            quantity: qty,
            title: title.into(),
            price: Some(dec(price)),
            ..Default::default()
        }
    }

    fn sample_input() -> ReceiptInput {
        ReceiptInput {
            order: vec![
                line(2, "Wristband", "20.00"),
                LineItem {
                    properties: vec![
                        Property {
                            name: "Size".into(),
                            value: "Large".into(),
                            add_price: Some(dec("1.50")),
                        },
                        Property {
                            name: "Modifier".into(),
                            value: "No ice".into(),
                            add_price: None,
                        },
                    ],
                    ..line(1, "Slushie", "4.00")
                },
            ],
            transactions: vec![Transaction {
                gateway: "Cash".into(),
                kind: Some("sale".into()),
                amount: Some(dec("50")),
            }],
            order_number: "100457".into(),
            order_id: 9001,
            total_tax: dec("3.63"),
            subtotal_price: dec("44.00"),
            total_price: dec("47.63"),
            ..Default::default()
        }
    }

    #[test]
    fn test_receipt_layout() {
        let doc = compile_receipt(&sample_input(), &Branding::default(), printed_at());

        assert!(matches!(doc.blocks[0], Block::Image { .. }));
        assert_eq!(
            doc.texts(),
            vec![
                "1218 N Camp St\nSeguin, TX 78155\n\n",
                "Terms of Admission: https://zdtamusement.com/pages/terms",
                "REF#100457",
                "October 19, 2026 3:04:05 PM",
            ]
        );

        let rows = doc.table_rows();
        assert_eq!(rows[0], vec!["2", "Wristband @$20.00", "$40.00"]);
        assert_eq!(rows[1], vec!["1", "Slushie @$4.00", "$4.00"]);
        assert_eq!(rows[2], vec!["", "  Size: Large", "$1.50"]);
        assert_eq!(rows[3], vec!["", "  No ice", ""]);
        assert_eq!(rows[4], vec!["", "SUBTOTAL", "$44.00"]);
        assert_eq!(rows[5], vec!["", "TAX", "$3.63"]);
        assert_eq!(rows[6], vec!["", "TOTAL", "$47.63"]);
        assert_eq!(rows[7], vec!["", "Cash", "$50.00"]);
        assert_eq!(rows.len(), 8);

        let Some(Block::Table { header, .. }) = doc.blocks.iter().find(|b| matches!(b, Block::Table { .. })) else {
            panic!("receipt has no table");
        };
        assert_eq!(header[0].value, "#");
        assert_eq!(header[1].value, "457");
    }

    #[test]
    fn test_negative_amounts_are_parenthesized() {
        let mut input = sample_input();
        input.order = vec![LineItem {
            full_price: Some(dec("-5.00")),
            properties: vec![Property {
                name: "Credit".into(),
                value: "Promo".into(),
                add_price: Some(dec("-0.75")),
            }],
            ..line(2, "Refund", "-5.00")
        }];
        input.total_price = dec("-10.75");

        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        let rows = doc.table_rows();
        assert_eq!(rows[0], vec!["2", "Refund @($5.00)", "($10.00)"]);
        assert_eq!(rows[1][2], "($1.50)");
        assert!(rows.iter().any(|r| r == &vec!["", "TOTAL", "($10.75)"]));
    }

    #[test]
    fn test_empty_order_still_prints_totals_and_footer() {
        let input = ReceiptInput {
            order_number: "7".into(),
            ..Default::default()
        };
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        let rows = doc.table_rows();
        assert_eq!(
            rows,
            vec![
                vec!["", "SUBTOTAL", "$0.00"],
                vec!["", "TAX", "$0.00"],
                vec!["", "TOTAL", "$0.00"],
            ]
        );
        assert!(doc.texts().contains(&"REF#7"));
    }

    #[test]
    fn test_percentage_discounts_use_pre_discount_subtotal() {
        let codes = vec![
            DiscountCode {
                code: "TEN".into(),
                kind: DiscountKind::Percentage,
                amount: Some(dec("10")),
            },
            DiscountCode {
                code: "FIVEOFF".into(),
                kind: DiscountKind::FixedAmount,
                amount: Some(dec("5")),
            },
            DiscountCode {
                code: "TWENTY".into(),
                kind: DiscountKind::Percentage,
                amount: Some(dec("20")),
            },
        ];
        let values = discount_values(dec("100"), &codes);
        assert_eq!(values, vec![dec("10"), dec("5"), dec("20")]);

        let mut reversed = codes.clone();
        reversed.reverse();
        let mut reversed_values = discount_values(dec("100"), &reversed);
        reversed_values.reverse();
        assert_eq!(reversed_values, values);
    }

    #[test]
    fn test_discount_rows_render_even_when_zero() {
        let mut input = sample_input();
        input.discount_codes = vec![
            DiscountCode {
                code: "HALF".into(),
                kind: DiscountKind::Percentage,
                amount: Some(dec("50")),
            },
            DiscountCode {
                code: "NOTHING".into(),
                kind: DiscountKind::FixedAmount,
                amount: Some(Decimal::ZERO),
            },
        ];
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        let rows = doc.table_rows();
        // pre-discount subtotal is 2×20 + 1×4 = 44
        assert!(rows.contains(&vec!["", "HALF", "($22.00)"]));
        assert!(rows.contains(&vec!["", "NOTHING", "($0.00)"]));
    }

    #[test]
    fn test_change_transaction_renders_change_due() {
        let mut input = sample_input();
        input.transactions.push(Transaction {
            gateway: "Cash".into(),
            kind: Some("change".into()),
            amount: Some(dec("2.37")),
        });
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        let rows = doc.table_rows();
        assert_eq!(rows.last().unwrap(), &vec!["", "Change Due", "($2.37)"]);
    }

    #[test]
    fn test_name_header_for_tab_or_employee() {
        let mut input = sample_input();
        input.customer = Some(Customer {
            first_name: Some("Dana".into()),
            last_name: Some("Reyes".into()),
            tags: vec![],
        });
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        assert!(matches!(doc.blocks[0], Block::Image { .. }));

        input.transactions.push(Transaction {
            gateway: "Tab".into(),
            kind: None,
            amount: Some(dec("12")),
        });
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        assert_eq!(doc.texts()[0], "Dana Reyes");

        input.transactions.pop();
        input.customer.as_mut().unwrap().tags = vec!["employee".into()];
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        assert_eq!(doc.texts()[0], "Dana Reyes");

        input.customer.as_mut().unwrap().first_name = None;
        let doc = compile_receipt(&input, &Branding::default(), printed_at());
        assert!(matches!(doc.blocks[0], Block::Image { .. }));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let input = sample_input();
        let a = compile_receipt(&input, &Branding::default(), printed_at());
        let b = compile_receipt(&input, &Branding::default(), printed_at());
        assert_eq!(a, b);
    }

    #[test]
    fn test_last_three_of_short_numbers() {
        assert_eq!(last_three("12"), "12");
        assert_eq!(last_three("1234"), "234");
        assert_eq!(last_three(""), "");
    }
}
