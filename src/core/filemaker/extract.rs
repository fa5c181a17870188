//! Flattens Data API found sets into [`Record`]s.

use super::client::ResultSet;
use super::{FM_METADATA, FM_MOD_ID, FM_RECORD_ID};
use crate::domain::model::Record;
use crate::utils::error::{FmError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Options shared by the select operations.
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Add `__RECORD_ID__` and `__MODIFICATION_ID__` to records and portal rows.
    pub ids: bool,
    /// Add `__METADATA__` (found, fetch and total counts) to each record.
    pub metadata: bool,
    /// Fields converted to Unix timestamps when non-empty.
    pub timestamps: Vec<String>,
    /// Return values raw instead of HTML-escaped.
    pub decode: bool,
    /// Strip the `Relationship::` prefix from portal field names.
    pub trim: bool,
    pub max_records: Option<usize>,
    pub start: usize,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            ids: true,
            metadata: false,
            timestamps: Vec::new(),
            decode: false,
            trim: false,
            max_records: None,
            start: 0,
        }
    }
}

/// What an operation should hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returning {
    Nothing,
    RecordId,
    Records,
    /// A single field of the first record.
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Returned {
    Nothing,
    RecordId(String),
    Records(Vec<Record>),
    /// One record, when an insert asked for [`Returning::Records`].
    Record(Record),
    Value(Value),
}

impl Returned {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Returned::Records(records) => records,
            Returned::Record(record) => vec![record],
            _ => Vec::new(),
        }
    }
}

pub fn process_return(set: &ResultSet, returning: &Returning, options: &FindOptions) -> Result<Returned> {
    match returning {
        Returning::RecordId => set
            .records
            .first()
            .map(|r| Returned::RecordId(r.record_id.clone()))
            .ok_or_else(|| FmError::new(-1, "No record available in the result").into()),
        Returning::Records => Ok(Returned::Records(extract_records(set, options)?)),
        Returning::Nothing => Ok(Returned::Nothing),
        Returning::Field(field) => {
            let records = extract_records(set, options)?;
            records
                .into_iter()
                .next()
                .and_then(|mut r| r.data.remove(field))
                .map(Returned::Value)
                .ok_or_else(|| {
                    FmError::new(-1, format!("Field {} does not exist in that record", field))
                        .into()
                })
        }
    }
}

pub fn extract_records(set: &ResultSet, options: &FindOptions) -> Result<Vec<Record>> {
    let metadata = options.metadata.then(|| {
        let info = set.data_info.clone().unwrap_or_default();
        json!({
            "found": info.found_count,
            "fetch": info.returned_count,
            "total": info.total_record_count,
        })
    });

    let mut records = Vec::with_capacity(set.records.len());
    for raw in &set.records {
        let mut data = HashMap::new();

        for (field, value) in &raw.field_data {
            data.insert(field.clone(), field_value(field, value, options)?);
        }

        if options.ids {
            data.insert(FM_RECORD_ID.to_string(), Value::String(raw.record_id.clone()));
            data.insert(FM_MOD_ID.to_string(), Value::String(raw.mod_id.clone()));
        }

        if let Some(metadata) = &metadata {
            data.insert(FM_METADATA.to_string(), metadata.clone());
        }

        for (portal, rows) in &raw.portal_data {
            let rows = rows
                .iter()
                .map(|row| Value::Object(portal_row(row, options)))
                .collect();
            data.insert(portal.clone(), Value::Array(rows));
        }

        records.push(Record { data });
    }

    Ok(records)
}

fn field_value(field: &str, value: &Value, options: &FindOptions) -> Result<Value> {
    if options.timestamps.iter().any(|f| f == field) {
        if let Some(text) = value.as_str().filter(|s| !s.is_empty()) {
            return Ok(Value::from(to_timestamp(text)?));
        }
    }
    Ok(plain_value(value, options))
}

fn plain_value(value: &Value, options: &FindOptions) -> Value {
    match value {
        Value::String(s) if !options.decode => Value::String(encode_html(s)),
        other => other.clone(),
    }
}

fn portal_row(row: &Map<String, Value>, options: &FindOptions) -> Map<String, Value> {
    let mut out = Map::new();
    for (field, value) in row {
        if field == "recordId" || field == "modId" {
            continue;
        }
        let name = match field.split_once("::") {
            Some((relation, rest)) if options.trim && !relation.is_empty() => rest,
            _ => field.as_str(),
        };
        out.insert(name.to_string(), plain_value(value, options));
    }

    if options.ids {
        out.insert(FM_RECORD_ID.to_string(), id_value(row.get("recordId")));
        out.insert(FM_MOD_ID.to_string(), id_value(row.get("modId")));
    }
    out
}

fn id_value(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Number(n)) => Value::String(n.to_string()),
        _ => Value::String(String::new()),
    }
}

/// Parses FileMaker date, time and timestamp text (`MM/DD/YYYY HH:MM:SS`) as UTC.
///
/// Times on their own count from the epoch.
pub fn to_timestamp(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%m/%d/%Y %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%m/%d/%Y") {
        return Ok(date.and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp()).unwrap_or_default());
    }
    if let Ok(time) = NaiveTime::parse_from_str(text, "%H:%M:%S") {
        return Ok(i64::from(time.num_seconds_from_midnight()));
    }
    Err(FmError::new(
        -1,
        format!("Failed to parse \"{}\" as a FileMaker date value.", text),
    )
    .into())
}

pub fn encode_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filemaker::client::{DataInfo, RawRecord};
    use crate::utils::error::MsLibError;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sample_set() -> ResultSet {
        let portal = json!({
            "OrderLines": [
                {"recordId": "11", "modId": "2", "Lines::Sku": "A-1", "Lines::Qty": 3},
                {"recordId": "12", "modId": "0", "Lines::Sku": "B<2>", "Lines::Qty": 1}
            ],
            "Notes": []
        });

        ResultSet {
            records: vec![RawRecord {
                field_data: as_map(json!({
                    "Customer": "Smith & Sons",
                    "Total": 42.5,
                    "Created": "02/03/2021 10:30:00",
                    "Shipped": ""
                })),
                portal_data: serde_json::from_value(portal).unwrap(),
                record_id: "7".to_string(),
                mod_id: "4".to_string(),
            }],
            data_info: Some(DataInfo {
                total_record_count: 120,
                found_count: 3,
                returned_count: 1,
            }),
        }
    }

    #[test]
    fn test_extract_defaults() {
        let records = extract_records(&sample_set(), &FindOptions::default()).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.get_str("Customer"), Some("Smith &amp; Sons"));
        assert_eq!(record.get("Total"), Some(&json!(42.5)));
        assert_eq!(record.get_str(FM_RECORD_ID), Some("7"));
        assert_eq!(record.get_str(FM_MOD_ID), Some("4"));
        assert!(record.get(FM_METADATA).is_none());

        let lines = record.get("OrderLines").unwrap().as_array().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["Lines::Sku"], "A-1");
        assert_eq!(lines[1]["Lines::Sku"], "B&lt;2&gt;");
        assert_eq!(lines[0][FM_RECORD_ID], "11");
        assert_eq!(record.get("Notes"), Some(&json!([])));
    }

    #[test]
    fn test_extract_with_options() {
        let options = FindOptions {
            ids: false,
            metadata: true,
            timestamps: vec!["Created".to_string(), "Shipped".to_string()],
            decode: true,
            trim: true,
            ..FindOptions::default()
        };
        let records = extract_records(&sample_set(), &options).unwrap();
        let record = &records[0];

        assert_eq!(record.get_str("Customer"), Some("Smith & Sons"));
        assert_eq!(record.get("Created"), Some(&json!(1612348200)));
        assert_eq!(record.get_str("Shipped"), Some(""));
        assert!(record.get(FM_RECORD_ID).is_none());
        assert_eq!(
            record.get(FM_METADATA),
            Some(&json!({"found": 3, "fetch": 1, "total": 120}))
        );

        let lines = record.get("OrderLines").unwrap().as_array().unwrap();
        assert_eq!(lines[1]["Sku"], "B<2>");
        assert_eq!(lines[1]["Qty"], 1);
        assert!(lines[1].get(FM_RECORD_ID).is_none());
    }

    #[test]
    fn test_portal_rows_follow_decode() {
        let portal_sku = |options: &FindOptions| {
            let records = extract_records(&sample_set(), options).unwrap();
            let lines = records[0].get("OrderLines").unwrap().as_array().unwrap();
            lines[1]["Lines::Sku"].clone()
        };

        assert_eq!(portal_sku(&FindOptions::default()), json!("B&lt;2&gt;"));

        let raw = FindOptions {
            decode: true,
            ..FindOptions::default()
        };
        assert_eq!(portal_sku(&raw), json!("B<2>"));
    }

    #[test]
    fn test_bad_timestamp() {
        let options = FindOptions {
            timestamps: vec!["Customer".to_string()],
            ..FindOptions::default()
        };
        let err = extract_records(&sample_set(), &options).unwrap_err();
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn test_to_timestamp_formats() {
        assert_eq!(to_timestamp("01/01/1970 00:01:00").unwrap(), 60);
        assert_eq!(to_timestamp("01/02/1970").unwrap(), 86400);
        assert_eq!(to_timestamp("01:00:05").unwrap(), 3605);
        assert!(to_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_process_return() {
        let set = sample_set();
        let options = FindOptions::default();

        assert_eq!(
            process_return(&set, &Returning::RecordId, &options).unwrap(),
            Returned::RecordId("7".to_string())
        );
        assert_eq!(
            process_return(&set, &Returning::Nothing, &options).unwrap(),
            Returned::Nothing
        );
        assert_eq!(
            process_return(&set, &Returning::Field("Total".to_string()), &options).unwrap(),
            Returned::Value(json!(42.5))
        );
        match process_return(&set, &Returning::Records, &options).unwrap() {
            Returned::Records(records) => assert_eq!(records.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_process_return_missing_field() {
        let err = process_return(
            &sample_set(),
            &Returning::Field("Nope".to_string()),
            &FindOptions::default(),
        )
        .unwrap_err();

        match err {
            MsLibError::FileMaker(e) => {
                assert_eq!(e.code, -1);
                assert_eq!(e.message, "Field Nope does not exist in that record");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_html() {
        assert_eq!(encode_html(r#"<a href="x">'y'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#039;y&#039;&lt;/a&gt;");
    }
}
