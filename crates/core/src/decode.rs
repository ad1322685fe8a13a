use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_TIMESTAMP_OFFSET: &str = "timestamp_offset_seconds";
pub const FIELD_ACTIVITY_TYPE: &str = "activity_type";
pub const FIELD_STEP_COUNTER: &str = "step_counter";
pub const FIELD_DISTANCE: &str = "distance_meters";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Anchor: carries the absolute time later samples are offset from.
    MonitoringInfo,
    /// Sample: activity class plus cumulative counters.
    Monitoring,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// A decoded log message: a type tag plus named fields. A missing field is
/// absent from `fields`, never stored as zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedMessage {
    pub kind: MessageKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl DecodedMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(name)? {
            FieldValue::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            FieldValue::Integer(value) => Some(*value),
            FieldValue::Float(value) if value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            FieldValue::Float(value) => Some(*value),
            FieldValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Turns one log file into its ordered message stream.
pub trait RecordDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<DecodedMessage>>;
}

/// Reads pre-decoded message dumps (a JSON array of [`DecodedMessage`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl RecordDecoder for JsonDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<DecodedMessage>> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let messages: Vec<DecodedMessage> = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse message dump {}", path.display()))?;
        Ok(messages)
    }
}

#[cfg(feature = "fit-backend")]
pub use fit::FitDecoder;

#[cfg(feature = "fit-backend")]
mod fit {
    use std::fs::File;
    use std::path::Path;

    use anyhow::{anyhow, Context, Result};
    use chrono::Utc;
    use fitparser::profile::MesgNum;
    use fitparser::Value;

    use super::{
        DecodedMessage, FieldValue, MessageKind, RecordDecoder, FIELD_DISTANCE,
        FIELD_STEP_COUNTER, FIELD_TIMESTAMP_OFFSET,
    };

    /// Decodes Garmin FIT files through `fitparser`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FitDecoder;

    impl RecordDecoder for FitDecoder {
        fn decode(&self, path: &Path) -> Result<Vec<DecodedMessage>> {
            let mut file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            let records = fitparser::from_reader(&mut file)
                .map_err(|err| anyhow!("failed to decode FIT file {}: {}", path.display(), err))?;

            Ok(records
                .iter()
                .map(|record| {
                    let mut message = DecodedMessage::new(message_kind(record.kind()));
                    for field in record.fields() {
                        if let Some(value) = convert_value(field.value()) {
                            message
                                .fields
                                .insert(field_name(field.name()).to_string(), value);
                        }
                    }
                    message
                })
                .collect())
        }
    }

    fn message_kind(kind: MesgNum) -> MessageKind {
        match kind {
            MesgNum::MonitoringInfo => MessageKind::MonitoringInfo,
            MesgNum::Monitoring => MessageKind::Monitoring,
            _ => MessageKind::Other,
        }
    }

    fn field_name(raw: &str) -> &str {
        match raw {
            "timestamp_16" => FIELD_TIMESTAMP_OFFSET,
            "steps" => FIELD_STEP_COUNTER,
            "distance" => FIELD_DISTANCE,
            other => other,
        }
    }

    fn convert_value(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Timestamp(ts) => Some(FieldValue::Timestamp(ts.with_timezone(&Utc))),
            Value::Byte(v) | Value::Enum(v) | Value::UInt8(v) | Value::UInt8z(v) => {
                Some(FieldValue::Integer(i64::from(*v)))
            }
            Value::SInt8(v) => Some(FieldValue::Integer(i64::from(*v))),
            Value::SInt16(v) => Some(FieldValue::Integer(i64::from(*v))),
            Value::UInt16(v) | Value::UInt16z(v) => Some(FieldValue::Integer(i64::from(*v))),
            Value::SInt32(v) => Some(FieldValue::Integer(i64::from(*v))),
            Value::UInt32(v) | Value::UInt32z(v) => Some(FieldValue::Integer(i64::from(*v))),
            Value::SInt64(v) => Some(FieldValue::Integer(*v)),
            Value::UInt64(v) | Value::UInt64z(v) => i64::try_from(*v).ok().map(FieldValue::Integer),
            Value::Float32(v) => Some(FieldValue::Float(f64::from(*v))),
            Value::Float64(v) => Some(FieldValue::Float(*v)),
            Value::String(v) => Some(FieldValue::Text(v.clone())),
            _ => None,
        }
    }

}

/// Which decoder handles a file. `Auto` picks by extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    #[default]
    Auto,
    Fit,
    Json,
}

impl DecoderKind {
    pub fn resolve(self, path: &Path) -> DecoderKind {
        match self {
            DecoderKind::Auto => {
                let is_json = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
                if is_json {
                    DecoderKind::Json
                } else {
                    DecoderKind::Fit
                }
            }
            other => other,
        }
    }
}

impl RecordDecoder for DecoderKind {
    fn decode(&self, path: &Path) -> Result<Vec<DecodedMessage>> {
        match self.resolve(path) {
            DecoderKind::Json => JsonDecoder.decode(path),
            #[cfg(feature = "fit-backend")]
            _ => FitDecoder.decode(path),
            #[cfg(not(feature = "fit-backend"))]
            _ => Err(anyhow::anyhow!(
                "FIT decoding unavailable in this build; cannot read {}",
                path.display()
            )),
        }
    }
}
