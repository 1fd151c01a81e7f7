//! Grammar for storefront order-line descriptions.
//!
//! A line looks like
//!
//! ```text
//! Услуга ВК: Лайки Стандарт: 0.5 руб. / 1 шт   Ссылка: https://vk.com/wall-1_8  Количество: 95 - 1x48 = 48
//! Услуга Telegram: Премиум 1000 подп: 720 руб. 0.72/шт вместо 0.8/шт   Ссылка: https://t.me/x  Количество: 1 пакет
//! ```
//!
//! The first form is the standard unit-priced variant, the second the
//! discounted package variant. Both share the same prefix and suffix, so the
//! grammar is two ordered patterns built from shared fragments, each exposing
//! the same capture names.

use crate::core::payment::{calculated_price, dispatch_quantity};
use crate::domain::model::{ParsedLine, ProductLine};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

const PREFIX: &str = r"^Услуга:?\s+(?P<service_name>.+?):\s+";

const STANDARD_PRICE: &str = r"(?P<price>[0-9.]+)\s+руб\.\s*/\s*(?P<per_unit>[0-9.]+)\s+шт\s*";

const PACKAGE_PRICE: &str =
    r"(?P<price>[0-9.]+)\s+руб\.\s*(?P<per_unit>[0-9.]+)/шт\s+вместо\s+[0-9.]+/шт\s*";

const SUFFIX: &str = concat!(
    r"Ссылка:\s*(?P<url>\S.*?)\s*",
    r"Количество:\s*(?P<units>[0-9.]+)(?:\s+пакет)?",
    r"(?:\s+-\s+(?P<cart_count>[0-9]+)x(?P<cart_price>[0-9.]+)\s*=\s*(?P<cart_total>[0-9.]+))?",
    r"\s*$"
);

static STANDARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("{PREFIX}{STANDARD_PRICE}{SUFFIX}")).expect("standard line pattern")
});

static PACKAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("{PREFIX}{PACKAGE_PRICE}{SUFFIX}")).expect("package line pattern")
});

static EMBEDDED_UNITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("units pattern"));

static LINE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^\s*|;\s*)Услуга").expect("line split pattern"));

/// Upstream substitutes these Cyrillic letters for reserved URL characters.
const RESERVED_SUBSTITUTIONS: [(char, char); 3] = [('р', '%'), ('а', '@'), ('х', '=')];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("line matches neither the standard nor the package pattern")]
    NoMatch,

    #[error("field '{field}' is not a valid number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("package line has no unit count in service name '{service_name}'")]
    MissingPackageUnits { service_name: String },

    #[error("'{field}' exceeds the decimal range")]
    Overflow { field: &'static str },

    #[error("no paid amount supplied and the line carries no cart total")]
    MissingPaidAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Standard,
    Package,
}

impl Variant {
    const ORDERED: [Variant; 2] = [Variant::Standard, Variant::Package];

    fn pattern(&self) -> &'static Regex {
        match self {
            Variant::Standard => &STANDARD_RE,
            Variant::Package => &PACKAGE_RE,
        }
    }
}

/// Reverses the three upstream character substitutions, nothing else.
pub fn restore_reserved(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            RESERVED_SUBSTITUTIONS
                .iter()
                .find(|(marker, _)| *marker == c)
                .map(|(_, reserved)| *reserved)
                .unwrap_or(c)
        })
        .collect()
}

/// Applies the upstream substitutions; inverse of [`restore_reserved`].
pub fn obfuscate_reserved(url: &str) -> String {
    url.chars()
        .map(|c| {
            RESERVED_SUBSTITUTIONS
                .iter()
                .find(|(_, reserved)| *reserved == c)
                .map(|(marker, _)| *marker)
                .unwrap_or(c)
        })
        .collect()
}

/// Percent-decodes the restored url. Invalid UTF-8 sequences become U+FFFD.
pub fn unescape_url(raw_url: &str) -> String {
    let restored = restore_reserved(raw_url.trim());
    let decoded = urlencoding::decode_binary(restored.as_bytes());
    String::from_utf8_lossy(&decoded).into_owned()
}

fn decimal_field(field: &'static str, value: &str) -> Result<Decimal, ParseFailure> {
    Decimal::from_str(value).map_err(|_| ParseFailure::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn optional_decimal(
    caps: &Captures<'_>,
    group: &'static str,
) -> Result<Option<Decimal>, ParseFailure> {
    caps.name(group)
        .map(|m| decimal_field(group, m.as_str()))
        .transpose()
}

fn clean_service_name(raw: &str) -> String {
    raw.trim_matches(|c: char| c == ':' || c.is_whitespace())
        .to_string()
}

/// Parses one description. Caller-supplied `quantity` and `paid_amount` take
/// precedence over the optional `- NxP = T` cart suffix.
pub fn parse_line(
    text: &str,
    quantity: Option<Decimal>,
    paid_amount: Option<Decimal>,
) -> Result<ParsedLine, ParseFailure> {
    let name = text.trim();
    let (variant, caps) = Variant::ORDERED
        .iter()
        .find_map(|v| v.pattern().captures(name).map(|caps| (*v, caps)))
        .ok_or(ParseFailure::NoMatch)?;

    let service_name = clean_service_name(&caps["service_name"]);
    let price_per_unit = decimal_field("price_per_unit", &caps["price"])?;
    let per_unit = decimal_field("per_unit", &caps["per_unit"])?;
    if per_unit <= Decimal::ZERO {
        return Err(ParseFailure::InvalidNumber {
            field: "per_unit",
            value: caps["per_unit"].to_string(),
        });
    }
    let target_url = unescape_url(&caps["url"]);

    let is_package = variant == Variant::Package;
    let units_amount = if is_package {
        // The trailing count is the number of packages, the real volume
        // lives in the service name ("Премиум 2000 подп").
        let embedded = EMBEDDED_UNITS_RE.find(&service_name).ok_or_else(|| {
            ParseFailure::MissingPackageUnits {
                service_name: service_name.clone(),
            }
        })?;
        decimal_field("units_amount", embedded.as_str())?
    } else {
        decimal_field("units_amount", &caps["units"])?
    };

    let cart_count = optional_decimal(&caps, "cart_count")?;
    let cart_total = optional_decimal(&caps, "cart_total")?;

    let quantity = quantity.or(cart_count).unwrap_or(Decimal::ONE);
    let paid_amount = paid_amount
        .or(cart_total)
        .ok_or(ParseFailure::MissingPaidAmount)?;

    let line = ParsedLine {
        name: name.to_string(),
        service_name,
        price_per_unit,
        per_unit,
        target_url,
        units_amount,
        quantity,
        paid_amount,
        is_package,
    };
    // Pricing and dispatch must stay computable for every accepted line.
    calculated_price(&line)?;
    dispatch_quantity(&line)?;
    Ok(line)
}

pub fn parse_product(product: &ProductLine) -> Result<ParsedLine, ParseFailure> {
    parse_line(&product.name, product.quantity, product.amount)
}

/// Splits a `; `-joined multi-line order string into single descriptions.
pub fn split_order_lines(raw: &str) -> Vec<String> {
    LINE_SPLIT_RE
        .split(raw)
        .map(|part| part.trim().trim_end_matches(';').trim_end())
        .filter(|part| !part.is_empty())
        .map(|part| format!("Услуга{}", part))
        .collect()
}

/// Parses every description of a multi-line order string, dropping the ones
/// that do not match.
pub fn parse_raw_orders(raw: &str) -> Vec<ParsedLine> {
    split_order_lines(raw)
        .iter()
        .filter_map(|line| match parse_line(line, None, None) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Skipping order line '{}': {}", line, e);
                None
            }
        })
        .collect()
}
