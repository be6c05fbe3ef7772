use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::types::PriceSample;

/// Pull `(year, avgPrice)` pairs out of the `links` array, in order.
/// Entries with a missing, empty or zero year or price are skipped, as is
/// any body that doesn't have the expected shape.
pub fn samples(body: &Value) -> Vec<PriceSample> {
    let Some(links) = body.get("links").and_then(Value::as_array) else {
        debug!("Response has no links array");
        return Vec::new();
    };
    links
        .iter()
        .filter_map(|link| {
            let year = link.get("value").and_then(year)?;
            let price = link.get("avgPrice").and_then(price)?;
            Some(PriceSample { year, price })
        })
        .collect()
}

fn year(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    i32::try_from(year).ok().filter(|y| *y != 0)
}

fn price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .filter(|p| !p.is_zero())
}
