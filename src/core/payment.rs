use crate::core::parser::ParseFailure;
use crate::domain::model::{LineState, ParsedLine, PaymentAssessment};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Absolute under-payment the storefront's totals are allowed to drift by.
const PAYMENT_TOLERANCE: Decimal = Decimal::ONE;

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Package lines are priced per package; unit lines per delivered unit.
pub fn calculated_price(line: &ParsedLine) -> Result<Decimal, ParseFailure> {
    let price = if line.is_package {
        line.price_per_unit.checked_mul(line.quantity)
    } else {
        line.price_per_unit
            .checked_mul(line.units_amount)
            .and_then(|subtotal| subtotal.checked_mul(line.quantity))
    };
    price.map(round_money).ok_or(ParseFailure::Overflow {
        field: "calculated_price",
    })
}

pub fn is_payed(paid_amount: Decimal, calculated_price: Decimal) -> bool {
    paid_amount >= calculated_price
        || paid_amount.floor() == calculated_price.floor()
        || paid_amount
            .checked_sub(calculated_price)
            .is_some_and(|diff| diff.abs() <= PAYMENT_TOLERANCE)
}

impl PaymentAssessment {
    pub fn evaluate(line: &ParsedLine) -> Result<Self, ParseFailure> {
        let calculated_price = calculated_price(line)?;
        Ok(Self {
            calculated_price,
            is_payed: is_payed(line.paid_amount, calculated_price),
        })
    }
}

/// Initial lifecycle state of a freshly parsed line.
pub fn classify(_line: &ParsedLine, assessment: &PaymentAssessment) -> LineState {
    if assessment.is_payed {
        LineState::Created
    } else {
        LineState::NotPayed
    }
}

/// Volume sent to the provider: `round(units_amount * quantity)`.
pub fn dispatch_quantity(line: &ParsedLine) -> Result<u64, ParseFailure> {
    line.units_amount
        .checked_mul(line.quantity)
        .map(|volume| volume.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven))
        .map(|volume| volume.to_u64().unwrap_or(0))
        .ok_or(ParseFailure::Overflow {
            field: "dispatch_quantity",
        })
}
