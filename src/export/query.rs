//! Query range and cursor requests
//!
//! The range is fixed when the pipeline starts. Every (re)connection builds a
//! fresh [`CursorRequest`] from it plus the current resume identifier, so the
//! lower bound on the primary key is always strictly greater than the last
//! committed row.

use mongodb::bson::{Bson, DateTime, Document, doc, oid::ObjectId};

use crate::config::{Config, FilterValue};
use crate::error::{ConfigError, Result};

/// Primary key the cursor is ordered and resumed on.
pub const PRIMARY_KEY: &str = "_id";

/// Immutable query range plus equality filters
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRange {
    time_field: String,
    start: DateTime,
    end: DateTime,
    end_inclusive: bool,
    filters: Document,
    projection: Document,
    batch_size: u32,
}

/// Everything a store needs to open one cursor
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRequest {
    /// Range, equality and resume filter
    pub filter: Document,
    /// Fields to fetch
    pub projection: Document,
    /// Always ascending on the primary key
    pub sort: Document,
    /// Client-side prefetch size
    pub batch_size: u32,
    /// Last committed primary key, if any
    pub resume_after: Option<Bson>,
}

impl QueryRange {
    /// Build the range from a validated configuration
    ///
    /// # Arguments
    /// * `config` - Job configuration
    /// * `source_fields` - Fields the transformer reads; they form the projection
    pub fn from_config(config: &Config, source_fields: &[String]) -> Result<Self> {
        let query = &config.query;
        let mut filters = Document::new();
        for (field, value) in &query.filters {
            if field == PRIMARY_KEY || field == &query.time_field {
                return Err(ConfigError::Generic(format!(
                    "query.filters cannot constrain '{field}'; it is managed by the range"
                ))
                .into());
            }
            filters.insert(field.clone(), filter_to_bson(value));
        }

        let mut projection = doc! { PRIMARY_KEY: 1 };
        for field in source_fields {
            projection.insert(field.clone(), 1);
        }

        Ok(Self {
            time_field: query.time_field.clone(),
            start: DateTime::from_millis(config.range_start()?.timestamp_millis()),
            end: DateTime::from_millis(config.range_end()?.timestamp_millis()),
            end_inclusive: query.end_inclusive,
            filters,
            projection,
            batch_size: query.batch_size,
        })
    }

    /// Build the filter document for a cursor resuming after `resume_after`
    pub fn filter(&self, resume_after: Option<&Bson>) -> Document {
        let end_op = if self.end_inclusive { "$lte" } else { "$lt" };
        let mut bounds = doc! { "$gte": self.start };
        bounds.insert(end_op, self.end);
        let mut filter = Document::new();
        filter.insert(self.time_field.clone(), bounds);
        for (field, value) in &self.filters {
            filter.insert(field.clone(), value.clone());
        }
        if let Some(last) = resume_after {
            filter.insert(PRIMARY_KEY, doc! { "$gt": last.clone() });
        }
        filter
    }

    /// Build a full cursor request
    pub fn request(&self, resume_after: Option<&Bson>) -> CursorRequest {
        CursorRequest {
            filter: self.filter(resume_after),
            projection: self.projection.clone(),
            sort: doc! { PRIMARY_KEY: 1 },
            batch_size: self.batch_size,
            resume_after: resume_after.cloned(),
        }
    }
}

fn filter_to_bson(value: &FilterValue) -> Bson {
    match value {
        FilterValue::Bool(b) => Bson::Boolean(*b),
        FilterValue::Int(n) => Bson::Int64(*n),
        FilterValue::Float(f) => Bson::Double(*f),
        FilterValue::Text(s) => Bson::String(s.clone()),
        FilterValue::AnyOf(values) => {
            let values: Vec<Bson> = values.iter().map(filter_to_bson).collect();
            Bson::Document(doc! { "$in": values })
        }
    }
}

/// Render a primary key the way `--resume-after` accepts it back
pub fn format_resume_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Parse a `--resume-after` value: ObjectId hex, then integer, then string
pub fn parse_resume_id(value: &str) -> Bson {
    let value = value.trim();
    if value.len() == 24 {
        if let Ok(oid) = ObjectId::parse_str(value) {
            return Bson::ObjectId(oid);
        }
    }
    if let Ok(n) = value.parse::<i64>() {
        return Bson::Int64(n);
    }
    Bson::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> Config {
        let mut config = Config::default();
        config.query.start = "2025-07-01T00:00:00Z".into();
        config.query.end = "2025-07-02T00:00:00Z".into();
        config.query.batch_size = 250;
        let mut filters = BTreeMap::new();
        filters.insert("uid".to_string(), FilterValue::Text("acme".into()));
        filters.insert(
            "status".to_string(),
            FilterValue::AnyOf(vec![
                FilterValue::Text("UNDELIV".into()),
                FilterValue::Text("REJECTD".into()),
            ]),
        );
        config.query.filters = filters;
        config
    }

    #[test]
    fn test_filter_without_resume() {
        let range = QueryRange::from_config(&config(), &["msg_id".to_string()]).unwrap();
        let filter = range.filter(None);

        let created = filter.get_document("created_at").unwrap();
        assert!(created.contains_key("$gte"));
        assert!(created.contains_key("$lt"));
        assert_eq!(filter.get_str("uid").unwrap(), "acme");
        let status = filter.get_document("status").unwrap();
        assert_eq!(status.get_array("$in").unwrap().len(), 2);
        assert!(!filter.contains_key(PRIMARY_KEY));
    }

    #[test]
    fn test_filter_with_resume_and_inclusive_end() {
        let mut config = config();
        config.query.end_inclusive = true;
        let range = QueryRange::from_config(&config, &[]).unwrap();
        let request = range.request(Some(&Bson::Int64(41)));

        let id = request.filter.get_document(PRIMARY_KEY).unwrap();
        assert_eq!(id.get_i64("$gt").unwrap(), 41);
        assert!(request.filter.get_document("created_at").unwrap().contains_key("$lte"));
        assert_eq!(request.sort, doc! { "_id": 1 });
        assert_eq!(request.batch_size, 250);
        assert_eq!(request.resume_after, Some(Bson::Int64(41)));
    }

    #[test]
    fn test_projection_includes_primary_key() {
        let range =
            QueryRange::from_config(&config(), &["a".to_string(), "b.c".to_string()]).unwrap();
        let request = range.request(None);
        assert_eq!(request.projection, doc! { "_id": 1, "a": 1, "b.c": 1 });
    }

    #[test]
    fn test_filters_cannot_touch_managed_fields() {
        let mut config = config();
        config
            .query
            .filters
            .insert("_id".to_string(), FilterValue::Int(3));
        assert!(QueryRange::from_config(&config, &[]).is_err());
    }

    #[test]
    fn test_resume_id_round_trip() {
        let oid = ObjectId::new();
        assert_eq!(parse_resume_id(&oid.to_hex()), Bson::ObjectId(oid));
        assert_eq!(parse_resume_id("300000"), Bson::Int64(300_000));
        assert_eq!(parse_resume_id("msg-9"), Bson::String("msg-9".into()));
        assert_eq!(format_resume_id(&Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(format_resume_id(&Bson::Int32(7)), "7");
    }
}
