use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::models::{NewPersonInput, UpdatePersonInput};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed request body: {0}")]
    Malformed(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid id {0:?}: expected a base-10 integer")]
    InvalidId(String),
}

pub fn decode_new_person(body: &[u8]) -> Result<NewPersonInput, ValidationError> {
    decode(body)
}

pub fn decode_update_person(body: &[u8]) -> Result<UpdatePersonInput, ValidationError> {
    decode(body)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::Malformed("body is empty".to_string()));
    }

    // Derived struct deserializers also take positional arrays; only objects are accepted.
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)
        .map_err(|error| ValidationError::Malformed(error.to_string()))?;

    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|error| ValidationError::Malformed(error.to_string()))
}

pub fn parse_id(raw: &str) -> Result<i64, ValidationError> {
    raw.parse::<i64>()
        .map_err(|_| ValidationError::InvalidId(raw.to_string()))
}

impl NewPersonInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_fields(&self.first_name, &self.last_name, &self.email)
    }
}

impl UpdatePersonInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_fields(&self.first_name, &self.last_name, &self.email)
    }
}

fn require_fields(first_name: &str, last_name: &str, email: &str) -> Result<(), ValidationError> {
    if first_name.is_empty() {
        return Err(ValidationError::MissingField("first_name"));
    }
    if last_name.is_empty() {
        return Err(ValidationError::MissingField("last_name"));
    }
    if email.is_empty() {
        return Err(ValidationError::MissingField("email"));
    }

    Ok(())
}
