use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::core::config::AnswerStorage;

/// Answers keyed by question position or question id, value is the chosen
/// option. BTreeMap keeps signatures over the set order-independent.
pub(crate) type AnswerMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub(crate) enum AnswerError {
    #[error("legacy answer payload is not valid JSON: {0}")]
    Legacy(#[source] serde_json::Error),
    #[error("answer payload must be an object or a JSON-encoded object")]
    UnsupportedShape,
}

/// Bridges the two physical answer schemas in production data: rows written
/// as a native JSON object and older rows written as a JSON-encoded string.
/// Decoding accepts both; the write direction is fixed once at startup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AnswerCodec {
    storage: AnswerStorage,
}

impl AnswerCodec {
    pub(crate) fn new(storage: AnswerStorage) -> Self {
        Self { storage }
    }

    pub(crate) fn decode(&self, raw: &Value) -> Result<AnswerMap, AnswerError> {
        match raw {
            Value::Null => Ok(AnswerMap::new()),
            Value::Object(entries) => {
                let mut answers = AnswerMap::new();
                for (key, value) in entries {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    answers.insert(key.clone(), rendered);
                }
                Ok(answers)
            }
            Value::String(encoded) => {
                let inner: Value =
                    serde_json::from_str(encoded).map_err(AnswerError::Legacy)?;
                match inner {
                    Value::Object(_) | Value::Null => self.decode(&inner),
                    _ => Err(AnswerError::UnsupportedShape),
                }
            }
            _ => Err(AnswerError::UnsupportedShape),
        }
    }

    pub(crate) fn encode(&self, answers: &AnswerMap) -> Result<Value, serde_json::Error> {
        let object = serde_json::to_value(answers)?;
        match self.storage {
            AnswerStorage::Json => Ok(object),
            AnswerStorage::Text => Ok(Value::String(serde_json::to_string(answers)?)),
        }
    }
}
