use crate::models::order::PricedLine;

pub const DELIVERY_RATE_PER_KM: f64 = 0.05;

pub fn items_price(lines: &[PricedLine]) -> f64 {
    lines
        .iter()
        .map(|line| line.unit_price * f64::from(line.quantity))
        .sum()
}

pub fn delivery_price(distance_km: f64) -> f64 {
    distance_km * DELIVERY_RATE_PER_KM
}
