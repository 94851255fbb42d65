//! Request parameter helpers.
//!
//! Identifiers arrive as query strings, headers, or JSON values that may be
//! either numbers or decimal strings. Missing or unparseable values are 400s.

use std::str::FromStr;

use axum::http::HeaderMap;
use serde::Deserialize;

use super::problem_details::{self, ProblemDetails};

/// Parse a required parameter.
pub fn required<T: FromStr>(name: &str, value: Option<&str>) -> Result<T, ProblemDetails> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| problem_details::bad_request(format!("missing parameter '{name}'")))?;
    value
        .parse()
        .map_err(|_| problem_details::bad_request(format!("invalid parameter '{name}': {value:?}")))
}

/// Parse a required request header.
pub fn header<T: FromStr>(headers: &HeaderMap, name: &str) -> Result<T, ProblemDetails> {
    let value = headers
        .get(name)
        .map(|v| v.to_str())
        .transpose()
        .map_err(|_| problem_details::bad_request(format!("header '{name}' is not valid text")))?;
    required(name, value)
}

/// A JSON identifier given as a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdParam {
    Number(i64),
    Text(String),
}

impl IdParam {
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T, ProblemDetails> {
        match self {
            Self::Number(n) => required(name, Some(&n.to_string())),
            Self::Text(s) => required(name, Some(s)),
        }
    }
}

/// Parse an optional JSON identifier.
pub fn required_id<T: FromStr>(name: &str, value: Option<&IdParam>) -> Result<T, ProblemDetails> {
    value
        .ok_or_else(|| problem_details::bad_request(format!("missing parameter '{name}'")))?
        .parse(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[test]
    fn required_rejects_missing_and_garbage() {
        assert_eq!(required::<i64>("chat_id", Some(" -100 ")).unwrap(), -100);
        assert_eq!(required::<i64>("chat_id", None).unwrap_err().status, 400);
        assert_eq!(required::<i64>("chat_id", Some("")).unwrap_err().status, 400);
        assert_eq!(required::<i32>("file_id", Some("x")).unwrap_err().status, 400);
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let number: IdParam = serde_json::from_str("42").unwrap();
        let text: IdParam = serde_json::from_str(r#""42""#).unwrap();
        assert_eq!(number.parse::<SessionId>("session_id").unwrap(), SessionId::new(42));
        assert_eq!(text.parse::<SessionId>("session_id").unwrap(), SessionId::new(42));
        assert!(required_id::<i64>("chat_id", None).is_err());
    }

    #[test]
    fn headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("chat_id", "-5".parse().unwrap());
        assert_eq!(header::<i64>(&headers, "chat_id").unwrap(), -5);
        assert_eq!(header::<i64>(&headers, "session_id").unwrap_err().status, 400);
    }
}
