//! Unified error model for the wire front end.
//! Codec, parser, portal and backend failures all surface as [`ProxyError`], which knows how to
//! render itself into the fields of a pgwire ErrorResponse.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ColumnType;

/// Diagnostic payload produced by the backend collaborator. The front end forwards it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} ({sqlstate})")]
pub struct BackendError {
    pub sqlstate: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl BackendError {
    pub fn new<S: Into<String>>(sqlstate: S, message: S) -> Self {
        BackendError { sqlstate: sqlstate.into(), message: message.into(), detail: None }
    }

    pub fn with_detail<S: Into<String>>(mut self, detail: S) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unsupported column type oid {0}")]
    UnsupportedType(i32),

    #[error("invalid input syntax for type {kind}: \"{literal}\" ({reason})")]
    MalformedLiteral { kind: &'static str, literal: String, reason: String },

    #[error("value out of range for type {kind}: {reason}")]
    ValueOutOfRange { kind: &'static str, reason: String },

    #[error("cannot encode {value} as {column_type:?}")]
    TypeMismatch { column_type: ColumnType, value: &'static str },

    #[error("{0}")]
    IllegalPortalState(String),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("prepared statement \"{0}\" does not exist")]
    UnknownStatement(String),

    #[error("portal \"{0}\" does not exist")]
    UnknownPortal(String),

    #[error("prepared statement \"{0}\" already exists")]
    DuplicateStatement(String),

    #[error("portal \"{0}\" already exists")]
    DuplicatePortal(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid byte sequence for encoding \"UTF8\": {0}")]
    InvalidEncoding(String),

    #[error("canceling statement due to user request")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    pub fn malformed<L: Into<String>, R: Into<String>>(kind: &'static str, literal: L, reason: R) -> Self {
        ProxyError::MalformedLiteral { kind, literal: literal.into(), reason: reason.into() }
    }

    pub fn out_of_range<R: Into<String>>(kind: &'static str, reason: R) -> Self {
        ProxyError::ValueOutOfRange { kind, reason: reason.into() }
    }

    pub fn illegal_state<S: Into<String>>(msg: S) -> Self { ProxyError::IllegalPortalState(msg.into()) }

    pub fn protocol<S: Into<String>>(msg: S) -> Self { ProxyError::Protocol(msg.into()) }

    /// Pgwire mapping: return (sqlstate, severity, message)
    pub fn pgwire_fields(&self) -> (String, &'static str, String) {
        let msg = self.to_string();
        match self {
            ProxyError::UnsupportedType(_) => ("0A000".into(), "ERROR", msg), // feature_not_supported
            ProxyError::MalformedLiteral { .. } => ("22P02".into(), "ERROR", msg), // invalid_text_representation
            ProxyError::ValueOutOfRange { .. } => ("22003".into(), "ERROR", msg), // numeric_value_out_of_range
            ProxyError::TypeMismatch { .. } => ("42804".into(), "ERROR", msg), // datatype_mismatch
            ProxyError::IllegalPortalState(_) | ProxyError::Protocol(_) => ("08P01".into(), "ERROR", msg), // protocol_violation
            ProxyError::UnknownStatement(_) => ("26000".into(), "ERROR", msg), // invalid_sql_statement_name
            ProxyError::UnknownPortal(_) => ("34000".into(), "ERROR", msg), // invalid_cursor_name
            ProxyError::DuplicateStatement(_) => ("42P05".into(), "ERROR", msg), // duplicate_prepared_statement
            ProxyError::DuplicatePortal(_) => ("42P03".into(), "ERROR", msg), // duplicate_cursor
            ProxyError::InvalidEncoding(_) => ("22021".into(), "ERROR", msg), // character_not_in_repertoire
            ProxyError::Cancelled => ("57014".into(), "ERROR", msg), // query_canceled
            ProxyError::Backend(be) => (be.sqlstate.clone(), "ERROR", be.message.clone()),
            ProxyError::Io(_) => ("08006".into(), "FATAL", msg), // connection_failure
        }
    }

    /// Detail line for the ErrorResponse, only backends supply one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ProxyError::Backend(be) => be.detail.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgwire_fields_mapping() {
        let (code, sev, _) = ProxyError::UnsupportedType(142).pgwire_fields();
        assert_eq!(code, "0A000");
        assert_eq!(sev, "ERROR");

        let (code, _, msg) = ProxyError::malformed("integer", "abc", "not a number").pgwire_fields();
        assert_eq!(code, "22P02");
        assert!(msg.contains("\"abc\""));

        let (code, _, msg) = ProxyError::illegal_state("cannot describe before bind").pgwire_fields();
        assert_eq!(code, "08P01");
        assert_eq!(msg, "cannot describe before bind");

        let (code, sev, _) = ProxyError::Cancelled.pgwire_fields();
        assert_eq!(code, "57014");
        assert_eq!(sev, "ERROR");
    }

    #[test]
    fn backend_payload_is_preserved() {
        let err: ProxyError = BackendError::new("23505", "duplicate key value violates unique constraint")
            .with_detail("Key (id)=(1) already exists.")
            .into();
        let (code, _, msg) = err.pgwire_fields();
        assert_eq!(code, "23505");
        assert_eq!(msg, "duplicate key value violates unique constraint");
        assert_eq!(err.detail(), Some("Key (id)=(1) already exists."));
    }

    #[test]
    fn backend_error_is_the_source() {
        use std::error::Error as _;
        let err = ProxyError::from(BackendError::new("42P01", "relation \"t\" does not exist"));
        let source = err.source().expect("backend error source");
        assert_eq!(source.to_string(), "relation \"t\" does not exist (42P01)");
        assert_eq!(err.to_string(), source.to_string());
    }

    #[test]
    fn invalid_encoding_maps_to_22021() {
        let (code, sev, msg) = ProxyError::InvalidEncoding("0xff".into()).pgwire_fields();
        assert_eq!(code, "22021");
        assert_eq!(sev, "ERROR");
        assert!(msg.contains("0xff"));
    }
}
