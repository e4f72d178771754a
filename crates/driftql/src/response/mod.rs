mod streaming;

use async_graphql_value::ConstValue;
use serde::Serialize;

use crate::error::ServerError;

pub use streaming::{IncrementalPayload, IncrementalResponse, InitialResponse, StreamingPayload};

/// The initial query response: everything that was not deferred.
#[derive(Debug, Default, Serialize)]
pub struct Response {
    /// Data of the query result. `None` when a request error prevented
    /// execution from starting at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ConstValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,
}

impl Response {
    #[must_use]
    pub fn new(data: ConstValue) -> Self {
        Response {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Create a response from some errors.
    #[must_use]
    pub fn from_errors(errors: Vec<ServerError>) -> Self {
        Response { data: None, errors }
    }

    pub fn to_json_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Returns `true` if the response is ok.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `true` if the response is error.
    #[inline]
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    /// Extract the errors from the response. Only if the `errors` field is
    /// empty will this return `Ok`.
    pub fn into_result(self) -> Result<Self, Vec<ServerError>> {
        if self.is_err() {
            Err(self.errors)
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_serialization() {
        let response = Response::new(ConstValue::from_json(serde_json::json!({ "a": 1 })).unwrap());
        assert_eq!(
            response.to_json_value().unwrap().to_string(),
            r#"{"data":{"a":1}}"#
        );

        let response = Response::from_errors(vec![ServerError::new("boom", None)]);
        assert_eq!(
            response.to_json_value().unwrap().to_string(),
            r#"{"errors":[{"message":"boom"}]}"#
        );
    }
}
