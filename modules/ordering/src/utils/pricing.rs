use crate::config::PricingConfig;
use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `price * quantity`, in cents precision.
pub fn line_total(price: Decimal, quantity: i32) -> Decimal {
    money(price * Decimal::from(quantity))
}

impl PricingConfig {
    /// Fee of the first zone containing `distance_km`, or the default fee when the
    /// distance is unknown or outside every zone.
    pub fn delivery_fee(&self, distance_km: Option<f64>) -> Decimal {
        let Some(km) = distance_km else {
            return self.default_delivery_fee;
        };
        self.zones
            .iter()
            .find(|zone| km >= zone.min_km && km <= zone.max_km)
            .and_then(|zone| {
                let km = Decimal::from_f64_retain(km)?;
                Some(money(zone.base_fee + zone.per_km_rate * km))
            })
            .unwrap_or(self.default_delivery_fee)
    }

    /// `total = subtotal + delivery_fee + tax - discount`, with tax levied on the subtotal.
    pub fn totals(
        &self,
        subtotal: Decimal,
        delivery_fee: Decimal,
        discount_amount: Decimal,
    ) -> OrderTotals {
        let tax_amount = money(subtotal * self.tax_rate);
        OrderTotals {
            subtotal,
            delivery_fee,
            tax_amount,
            discount_amount,
            total_amount: subtotal + delivery_fee + tax_amount - discount_amount,
        }
    }
}
