//! Requestor extraction from the incoming `authorization` header.
//!
//! The bearer token is parsed WITHOUT verification; authentication of the
//! caller happens upstream. The `email` claim only attributes the request in
//! the minted token's `req` claim. A missing header yields an empty
//! requestor; a malformed header or a non-string `email` claim is the
//! caller's error.

use axum::http::{header, HeaderMap};

use crate::errors::JvsError;

/// Extract the requestor principal from the request headers.
///
/// # Errors
///
/// `InvalidArgument` when the header is present but unusable.
pub fn requestor_from_headers(headers: &HeaderMap) -> Result<String, JvsError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(String::new());
    };

    let value = value
        .to_str()
        .map_err(|_| JvsError::InvalidArgument("invalid authorization header".to_string()))?;

    let token = strip_bearer(value)
        .ok_or_else(|| JvsError::InvalidArgument("invalid authorization header".to_string()))?;

    let payload = common::claims::peek_payload(token)
        .map_err(|_| JvsError::InvalidArgument("invalid authorization header".to_string()))?;

    match payload.get("email") {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(email)) => Ok(email.clone()),
        Some(_) => Err(JvsError::InvalidArgument(
            "invalid authorization header: email claim is not a string".to_string(),
        )),
    }
}

fn strip_bearer(value: &str) -> Option<&str> {
    let prefix = value.get(..7)?;
    if !prefix.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    value.get(7..)
}
