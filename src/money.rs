//! Integer-cents money type.
//!
//! All pricing arithmetic in this crate stays in `i64` cents; floating point
//! is only used at the very edge, to render a dollar amount for JSON (see
//! `edge::routes`), matching the DESIGN NOTES "keep cents as integer
//! everywhere internally" directive.

use serde::{Deserialize, Serialize};

use crate::pb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Money {
    pub currency_code: [u8; 3],
    pub amount_cents: i64,
}

/// JSON shape of `Money` at the HTTP boundary: `currencyCode` as a plain
/// 3-letter string, not the internal `[u8; 3]` (§4.3 "JSON field shapes").
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyWire {
    currency_code: String,
    amount_cents: i64,
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        MoneyWire {
            currency_code: self.currency_code().to_string(),
            amount_cents: self.amount_cents,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = MoneyWire::deserialize(deserializer)?;
        Ok(Money::new(&wire.currency_code, wire.amount_cents))
    }
}

impl Money {
    pub fn new(currency_code: &str, amount_cents: i64) -> Self {
        Self {
            currency_code: currency_bytes(currency_code),
            amount_cents,
        }
    }

    pub fn currency_code(&self) -> &str {
        std::str::from_utf8(&self.currency_code).unwrap_or("USD")
    }

    /// Dollars as a decimal number, for JSON emit only.
    pub fn as_dollars(&self) -> f64 {
        self.amount_cents as f64 / 100.0
    }

    pub fn checked_mul_qty(&self, quantity: u32) -> Option<Money> {
        self.amount_cents
            .checked_mul(quantity as i64)
            .map(|amount_cents| Money {
                currency_code: self.currency_code,
                amount_cents,
            })
    }

    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        self.amount_cents.checked_add(other.amount_cents).map(|amount_cents| Money {
            currency_code: self.currency_code,
            amount_cents,
        })
    }
}

fn currency_bytes(code: &str) -> [u8; 3] {
    let mut bytes = [b'U', b'S', b'D'];
    let upper = code.to_uppercase();
    let src = upper.as_bytes();
    if src.len() == 3 {
        bytes.copy_from_slice(src);
    }
    bytes
}

/// `floor(subtotal * rate_bps / 10_000)`, used by the tax node (rate 800 = 8%).
pub fn floor_percent_bps(amount_cents: i64, rate_bps: i64) -> i64 {
    (amount_cents * rate_bps) / 10_000
}

impl From<Money> for pb::Money {
    fn from(m: Money) -> Self {
        pb::Money {
            currency_code: m.currency_code().to_string(),
            amount_cents: m.amount_cents,
        }
    }
}

impl From<pb::Money> for Money {
    fn from(m: pb::Money) -> Self {
        Money::new(&m.currency_code, m.amount_cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_and_add_stay_integer() {
        let unit = Money::new("USD", 89_900);
        let line = unit.checked_mul_qty(2).unwrap();
        assert_eq!(line.amount_cents, 179_800);

        let tax = floor_percent_bps(line.amount_cents, 800);
        assert_eq!(tax, 14_384); // floor(179800 * 0.08) = 14384.0 exactly

        let total = line.checked_add(&Money::new("USD", tax)).unwrap();
        assert_eq!(total.amount_cents, 194_184);
    }

    #[test]
    fn floor_rounds_down_not_to_nearest() {
        // 12345 cents * 8% = 987.6 -> floor 987
        assert_eq!(floor_percent_bps(12_345, 800), 987);
    }

    #[test]
    fn json_wire_shape_is_camel_case_string_currency() {
        let m = Money::new("USD", 89_900);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"currencyCode":"USD","amountCents":89900}"#);
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn currency_code_roundtrips_through_pb() {
        let m = Money::new("usd", 500);
        let pb: pb::Money = m.into();
        assert_eq!(pb.currency_code, "USD");
        let back: Money = pb.into();
        assert_eq!(back.amount_cents, 500);
        assert_eq!(back.currency_code(), "USD");
    }
}
