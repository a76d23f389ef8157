//! Plain-text rendering of BSON values for CSV cells
//!
//! Nulls become empty cells, scalars render in their natural textual form
//! and nested values render as relaxed extended JSON so they stay on one line.

use mongodb::bson::{Binary, Bson, Document};

use super::datetime::TimestampFormatter;

/// Converts a BSON value into the text of one cell
pub trait CellConverter {
    /// Convert a present value
    fn convert(&self, value: &Bson) -> String;

    /// Convert an optional value, absent values become an empty cell
    fn convert_optional(&self, value: Option<&Bson>) -> String {
        value.map(|v| self.convert(v)).unwrap_or_default()
    }
}

/// Default converter for `identity` fields
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextConverter {
    timestamps: TimestampFormatter,
}

impl PlainTextConverter {
    pub fn new(timestamps: TimestampFormatter) -> Self {
        Self { timestamps }
    }

    fn format_double(f: f64) -> String {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
            format!("{}", f as i64)
        } else {
            f.to_string()
        }
    }

    fn format_binary(bin: &Binary) -> String {
        hex::encode(&bin.bytes)
    }

    fn format_nested(value: &Bson) -> String {
        let json = value.clone().into_relaxed_extjson();
        serde_json::to_string(&json).unwrap_or_default()
    }
}

impl CellConverter for PlainTextConverter {
    fn convert(&self, value: &Bson) -> String {
        match value {
            Bson::Null | Bson::Undefined => String::new(),
            Bson::String(s) => s.clone(),
            Bson::Int32(n) => n.to_string(),
            Bson::Int64(n) => n.to_string(),
            Bson::Double(f) => Self::format_double(*f),
            Bson::Boolean(b) => b.to_string(),
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::DateTime(_) => self.timestamps.format(Some(value)),
            Bson::Decimal128(d) => d.to_string(),
            Bson::Binary(bin) => Self::format_binary(bin),
            Bson::Symbol(s) => s.clone(),
            Bson::Array(_) | Bson::Document(_) => Self::format_nested(value),
            other => Self::format_nested(other),
        }
    }
}

/// Resolve a possibly dotted path (`routing.smsc`) inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// True when a value should be skipped in favour of the next source field
pub fn is_blank(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, spec::BinarySubtype};

    #[test]
    fn test_scalars() {
        let conv = PlainTextConverter::default();
        assert_eq!(conv.convert(&Bson::String("abc".into())), "abc");
        assert_eq!(conv.convert(&Bson::Int32(-4)), "-4");
        assert_eq!(conv.convert(&Bson::Int64(9_000_000_000)), "9000000000");
        assert_eq!(conv.convert(&Bson::Double(3.0)), "3");
        assert_eq!(conv.convert(&Bson::Double(2.5)), "2.5");
        assert_eq!(conv.convert(&Bson::Boolean(true)), "true");
        assert_eq!(conv.convert(&Bson::Null), "");
        assert_eq!(conv.convert_optional(None), "");
    }

    #[test]
    fn test_object_id_and_binary() {
        let conv = PlainTextConverter::default();
        let oid = ObjectId::new();
        assert_eq!(conv.convert(&Bson::ObjectId(oid)), oid.to_hex());

        let bin = Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![0xde, 0xad],
        });
        assert_eq!(conv.convert(&bin), "dead");
    }

    #[test]
    fn test_nested_values_are_single_line_json() {
        let conv = PlainTextConverter::default();
        let value = Bson::Document(doc! { "a": 1, "b": ["x", "y"] });
        let text = conv.convert(&value);
        assert!(!text.contains('\n'));
        assert_eq!(text, r#"{"a":1,"b":["x","y"]}"#);
    }

    #[test]
    fn test_lookup_dotted_paths() {
        let doc = doc! {
            "flat.key": "direct",
            "routing": { "smsc": "smsc-1", "hops": ["a", "b"] },
        };
        assert_eq!(lookup(&doc, "flat.key"), Some(&Bson::String("direct".into())));
        assert_eq!(lookup(&doc, "routing.smsc"), Some(&Bson::String("smsc-1".into())));
        assert_eq!(lookup(&doc, "routing.hops.1"), Some(&Bson::String("b".into())));
        assert_eq!(lookup(&doc, "routing.missing"), None);
        assert_eq!(lookup(&doc, "nothing"), None);
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(&Bson::Null));
        assert!(is_blank(&Bson::String("  ".into())));
        assert!(!is_blank(&Bson::Int32(0)));
    }
}
