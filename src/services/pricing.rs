//! Order total computation.
//!
//! Pure and deterministic: no I/O, no clock, no catalog reads. The checkout
//! orchestrator feeds it the validated cart lines and an already-resolved
//! discount rate (promo-code validation happens upstream of this crate).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Tax is applied to the post-discount subtotal.
pub const TAX_RATE: Decimal = dec!(0.08);

/// Orders with a pre-discount subtotal strictly above this ship free.
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(10000);

/// Shipping service level chosen at checkout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ShippingMethod {
    Standard,
    Express,
    Overnight,
}

impl ShippingMethod {
    /// Flat fee charged when the order does not qualify for free shipping.
    pub fn flat_fee(self) -> Decimal {
        match self {
            Self::Standard => dec!(150),
            Self::Express => dec!(250),
            Self::Overnight => dec!(500),
        }
    }
}

/// All five monetary components of an order, computed together so the
/// `total = subtotal - discount + shipping + tax` identity holds exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricingBreakdown {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Computes order totals from (unit_price, quantity) cart lines.
///
/// The free-shipping threshold is checked against the pre-discount subtotal,
/// strictly: a subtotal of exactly 10000 still pays the flat fee.
pub fn quote(
    lines: &[(Decimal, i32)],
    discount_rate: Decimal,
    shipping_method: ShippingMethod,
) -> PricingBreakdown {
    let subtotal: Decimal = lines
        .iter()
        .map(|(unit_price, quantity)| *unit_price * Decimal::from(*quantity))
        .sum();

    let discount_amount = subtotal * discount_rate;

    let shipping_amount = if subtotal > FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        shipping_method.flat_fee()
    };

    let tax_amount = (subtotal - discount_amount) * TAX_RATE;

    PricingBreakdown {
        subtotal,
        discount_amount,
        shipping_amount,
        tax_amount,
        total_amount: subtotal - discount_amount + shipping_amount + tax_amount,
    }
}
