//! Row transformation
//!
//! Turns one source document into one [`ExportRecord`] by running the
//! declarative field-rule table from the configuration. The transformer never
//! fails on document content: missing values become empty cells, bad
//! timestamps become empty cells, undecryptable bodies become the sentinel and
//! malformed packet maps total zero. Only construction can fail, and only on
//! configuration faults.

pub mod cell;
pub mod crypto;
pub mod datetime;
pub mod rules;

use std::collections::BTreeMap;
use std::sync::Arc;

use mongodb::bson::{Bson, Document};

use crate::config::{Config, FieldRule, FieldSpec};
use crate::error::{ConfigError, Result};

pub use cell::{CellConverter, PlainTextConverter};
pub use crypto::{BodyDecryptor, DecryptOutcome};
pub use datetime::TimestampFormatter;
pub use rules::{StatusMap, packet_total};

/// One output row: values in configured column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl ExportRecord {
    pub fn new(headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self { headers, values }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value of a column by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Column {
    rule: FieldRule,
    sources: Vec<String>,
    replace: BTreeMap<String, String>,
}

impl Column {
    fn from_spec(spec: &FieldSpec) -> Self {
        let sources = if spec.source.is_empty() {
            vec![spec.name.clone()]
        } else {
            spec.source.clone()
        };
        Self {
            rule: spec.rule,
            sources,
            replace: spec.replace.clone(),
        }
    }
}

/// Applies the field-rule table to source documents
#[derive(Debug, Clone)]
pub struct RowTransformer {
    headers: Arc<[String]>,
    columns: Vec<Column>,
    timestamps: TimestampFormatter,
    cells: PlainTextConverter,
    decryptor: Option<BodyDecryptor>,
    sentinel: String,
    statuses: StatusMap,
    partition_fields: Option<Vec<String>>,
}

impl RowTransformer {
    /// Build the transformer from configuration
    ///
    /// Fails only when a `decrypt` field is configured without a usable key.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timestamps = TimestampFormatter::new(config.transform.utc_offset_minutes);

        let decryptor = if config.fields.iter().any(|f| f.rule == FieldRule::Decrypt) {
            let key = config
                .transform
                .decrypt_key
                .as_deref()
                .ok_or_else(|| ConfigError::MissingField("transform.decrypt_key".to_string()))?;
            Some(BodyDecryptor::new(key)?)
        } else {
            None
        };

        let headers: Arc<[String]> = config.fields.iter().map(|f| f.name.clone()).collect();

        Ok(Self {
            headers,
            columns: config.fields.iter().map(Column::from_spec).collect(),
            timestamps,
            cells: PlainTextConverter::new(timestamps),
            decryptor,
            sentinel: config.transform.decrypt_sentinel.clone(),
            statuses: StatusMap::from_config(&config.transform.status),
            partition_fields: config
                .output
                .rotate_by_day
                .then(|| config.output.partition_fields.clone()),
        })
    }

    /// Header row, in output order
    pub fn headers(&self) -> Arc<[String]> {
        Arc::clone(&self.headers)
    }

    /// Transform one document; always yields one value per column
    pub fn transform(&self, doc: &Document) -> ExportRecord {
        let values = self
            .columns
            .iter()
            .map(|column| {
                let cell = self.render(column, first_present(doc, &column.sources));
                match column.replace.get(&cell) {
                    Some(replacement) => replacement.clone(),
                    None => cell,
                }
            })
            .collect();
        ExportRecord::new(self.headers(), values)
    }

    fn render(&self, column: &Column, value: Option<&Bson>) -> String {
        match column.rule {
            FieldRule::Identity => self.cells.convert_optional(value),
            FieldRule::Datetime => self.timestamps.format(value),
            FieldRule::Decrypt => match &self.decryptor {
                Some(decryptor) => decryptor.decrypt_value(value).into_cell(&self.sentinel),
                None => self.sentinel.clone(),
            },
            FieldRule::Status => self.statuses.map(value),
            FieldRule::PacketTotal => packet_total(value).to_string(),
        }
    }

    /// Day partition of a document, `None` when day rotation is off
    pub fn partition_key(&self, doc: &Document) -> Option<String> {
        let fields = self.partition_fields.as_ref()?;
        Some(self.timestamps.day_key(first_present(doc, fields)))
    }

    /// Source fields to project, without paths that collide with a parent
    pub fn source_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .columns
            .iter()
            .flat_map(|c| c.sources.iter().cloned())
            .chain(self.partition_fields.iter().flatten().cloned())
            .collect();
        fields.sort();
        fields.dedup();

        let parents = fields.clone();
        fields.retain(|field| {
            !parents.iter().any(|parent| {
                field
                    .strip_prefix(parent.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
            })
        });
        fields
    }
}

/// First source whose value is present and not blank
fn first_present<'a>(doc: &'a Document, sources: &[String]) -> Option<&'a Bson> {
    sources
        .iter()
        .filter_map(|path| cell::lookup(doc, path))
        .find(|value| !cell::is_blank(value))
}
