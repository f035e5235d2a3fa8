//! JSON wire codec for pipeline messages
//!
//! Input messages look like:
//!
//! ```text
//! {"ID": "7", "Image": "0.0,0.5,1.0"}
//! ```
//!
//! `ID` may be an integer or a string holding one. `Image` is a
//! comma-separated list of numeric literals. Output messages carry the
//! identifier followed by one `P<i>` field per class, in class order:
//!
//! ```text
//! {"ID":7,"P0":0.9,"P1":0.1}
//! ```

use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{InputRecord, PredictionResult};

/// Field carrying the record identifier
pub const ID_FIELD: &str = "ID";

/// Field carrying the comma-separated feature vector
pub const IMAGE_FIELD: &str = "Image";

/// Prefix of the per-class score fields in output messages
pub const SCORE_PREFIX: char = 'P';

/// Errors raised while decoding a wire message
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} must be {expected}")]
    InvalidFieldType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid feature at position {index}: {token:?}")]
    InvalidFeature { index: usize, token: String },

    #[error("Missing score for class {0}")]
    MissingScore(usize),
}

/// Decode an input message into an [`InputRecord`].
pub fn decode(bytes: &[u8]) -> Result<InputRecord, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let identifier = parse_id(object)?;

    let image = match object.get(IMAGE_FIELD) {
        Some(Value::String(image)) => image,
        Some(_) => {
            return Err(DecodeError::InvalidFieldType {
                field: IMAGE_FIELD,
                expected: "a comma-separated string",
            })
        }
        None => return Err(DecodeError::MissingField(IMAGE_FIELD)),
    };

    let features = parse_features(image)?;

    Ok(InputRecord::new(identifier, features))
}

/// Encode a [`PredictionResult`] as UTF-8 JSON bytes.
///
/// Non-finite scores are written as `null`.
pub fn encode(result: &PredictionResult) -> Vec<u8> {
    let mut out = String::with_capacity(16 + result.scores.len() * 24);
    out.push_str(&format!("{{\"{ID_FIELD}\":{}", result.identifier));
    for (idx, score) in result.class_scores() {
        out.push_str(&format!(",\"{SCORE_PREFIX}{idx}\":{}", Value::from(score)));
    }
    out.push('}');
    out.into_bytes()
}

/// Decode an output message back into a [`PredictionResult`].
///
/// Score fields may appear in any order but must cover `P0..Pk` without gaps.
pub fn decode_result(bytes: &[u8]) -> Result<PredictionResult, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let identifier = parse_id(object)?;

    let mut indexed: Vec<(usize, f64)> = Vec::new();
    for (key, value) in object {
        let Some(index) = key
            .strip_prefix(SCORE_PREFIX)
            .and_then(|rest| rest.parse::<usize>().ok())
        else {
            continue;
        };
        let score = match value {
            Value::Null => f64::NAN,
            other => other.as_f64().ok_or(DecodeError::InvalidFieldType {
                field: "P<index>",
                expected: "a number",
            })?,
        };
        indexed.push((index, score));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let mut scores = Vec::with_capacity(indexed.len());
    for (expected, (index, score)) in indexed.into_iter().enumerate() {
        if index != expected {
            return Err(DecodeError::MissingScore(expected));
        }
        scores.push(score);
    }

    Ok(PredictionResult::new(identifier, scores))
}

fn parse_id(object: &Map<String, Value>) -> Result<i64, DecodeError> {
    match object.get(ID_FIELD) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral))
            .ok_or_else(|| DecodeError::InvalidId(n.to_string())),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| DecodeError::InvalidId(s.clone())),
        Some(other) => Err(DecodeError::InvalidId(other.to_string())),
        None => Err(DecodeError::MissingField(ID_FIELD)),
    }
}

/// Whole-valued floats such as `7.0` are accepted as identifiers.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(value: f64) -> Option<i64> {
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.fract() == 0.0 && in_range).then(|| value as i64)
}

fn parse_features(image: &str) -> Result<Vec<f64>, DecodeError> {
    image
        .split(',')
        .enumerate()
        .map(|(index, token)| {
            token
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DecodeError::InvalidFeature {
                    index,
                    token: token.to_string(),
                })
        })
        .collect()
}
