use crate::error::{GradeError, LoadError};
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Failure of a single handler, rendered into the error envelope.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GradeError> for HandlerErr {
    fn from(e: GradeError) -> Self {
        let details = match &e {
            GradeError::Validation {
                field,
                value,
                min,
                max,
            } => Some(json!({ "field": field, "value": value, "min": min, "max": max })),
            GradeError::IncompleteData { missing } => Some(json!({ "missing": missing })),
            GradeError::NotEligible { status } => Some(json!({ "annualStatus": status })),
            GradeError::Locked { trimester } => Some(json!({ "trimester": trimester })),
            GradeError::InvalidPolicy(_) => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<LoadError> for HandlerErr {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Grade(g) => g.into(),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

/// Collapses a handler result into the response envelope.
pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
