use std::io::{self, Read};
use std::path::Path;

use serde_json::Value;
use spool_core::{canonical_json, ContentItem, ContentUpdate, Fingerprint};

use crate::error::CliError;

pub fn run_fingerprint(input: Option<&Path>, canonical: bool) -> Result<(), CliError> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let value: Value = serde_json::from_str(&raw)?;
    println!("{}", fingerprint_value(&value)?);
    if canonical {
        println!("{}", canonical_json(&value));
    }
    Ok(())
}

/// Fingerprint a full content item, falling back to a pull row.
pub fn fingerprint_value(value: &Value) -> Result<Fingerprint, CliError> {
    if let Ok(item) = serde_json::from_value::<ContentItem>(value.clone()) {
        return Ok(Fingerprint::of_item(&item));
    }
    serde_json::from_value::<ContentUpdate>(value.clone())
        .map(|update| Fingerprint::of_update(&update))
        .map_err(|error| CliError::UnrecognizedInput(error.to_string()))
}
