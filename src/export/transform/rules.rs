//! Status remapping and derived packet totals

use std::collections::HashMap;

use mongodb::bson::Bson;

use crate::config::StatusMapConfig;

/// Raw delivery status to reporting code
#[derive(Debug, Clone)]
pub struct StatusMap {
    codes: HashMap<String, String>,
    default_code: String,
}

impl StatusMap {
    pub fn from_config(config: &StatusMapConfig) -> Self {
        let mut codes = HashMap::new();
        for raw in &config.failed_values {
            codes.insert(raw.clone(), config.failed_code.clone());
        }
        // Delivered wins when a value is listed twice
        for raw in &config.delivered_values {
            codes.insert(raw.clone(), config.delivered_code.clone());
        }
        Self {
            codes,
            default_code: config.default_code.clone(),
        }
    }

    /// Map a raw status; anything unrecognised gets the default code
    pub fn map(&self, raw: Option<&Bson>) -> String {
        let key = match raw {
            Some(Bson::String(s)) => s.trim(),
            _ => return self.default_code.clone(),
        };
        self.codes
            .get(key)
            .unwrap_or(&self.default_code)
            .clone()
    }
}

impl Default for StatusMap {
    fn default() -> Self {
        Self::from_config(&StatusMapConfig::default())
    }
}

/// Sum `size * count` over a `{ "<size>": <count> }` mapping
///
/// Keys that are not numbers are skipped, counts that are not numbers count
/// as zero. Anything other than a document totals zero.
pub fn packet_total(value: Option<&Bson>) -> i64 {
    let Some(Bson::Document(packets)) = value else {
        return 0;
    };
    packets
        .iter()
        .filter_map(|(size, count)| {
            let size = size.trim().parse::<i64>().ok()?;
            Some(size.saturating_mul(as_count(count)))
        })
        .fold(0i64, i64::saturating_add)
}

fn as_count(value: &Bson) -> i64 {
    match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(f) if f.is_finite() => *f as i64,
        Bson::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}
