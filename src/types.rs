/// Monetary amounts in campaign currency; per-mille where a CPM is meant.
pub type Money = f64;

pub fn round_money(value: Money) -> Money {
    (value * 100.0).round() / 100.0
}
