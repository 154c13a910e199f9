//! Trace-context propagation.
//!
//! Parses an inbound `traceparent` header (`vv-<32 hex>-<16 hex>-ff`) into the
//! identifiers carried by a unit of work. A malformed or missing header starts
//! a new trace instead of failing the request; only entropy failures surface
//! as errors. Every parse mints a fresh request id.

use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::DomainError;

/// Trace version used when a new trace is started.
pub const DEFAULT_VERSION: &str = "00";
/// Trace flags used when a new trace is started (sampled).
pub const DEFAULT_FLAGS: &str = "01";

const TRACE_ID_BYTES: usize = 16;
const REQUEST_ID_BYTES: usize = 8;
const ZERO_TRACE_ID: &str = "00000000000000000000000000000000";

/// Trace identifiers attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInfo {
    /// Trace format version (2 hex chars).
    pub version: String,
    /// Trace id shared by every hop of the trace (32 hex chars).
    pub trace_id: String,
    /// Span id of the caller; empty when the trace was started here.
    pub parent_id: String,
    /// Id minted for this request (16 hex chars).
    pub request_id: String,
    /// Trace flags (2 hex chars).
    pub flags: String,
}

impl TraceInfo {
    /// Serializes the identifiers for propagation to a downstream hop, with
    /// this request as the parent.
    #[must_use]
    pub fn to_header(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.version, self.trace_id, self.request_id, self.flags
        )
    }
}

/// Anything that may carry trace identifiers for the current request.
pub trait TraceCarrier {
    /// The identifiers, if any were attached.
    fn trace_info(&self) -> Option<&TraceInfo>;
}

impl TraceCarrier for Option<TraceInfo> {
    fn trace_info(&self) -> Option<&TraceInfo> {
        self.as_ref()
    }
}

impl TraceCarrier for TraceInfo {
    fn trace_info(&self) -> Option<&TraceInfo> {
        Some(self)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
enum TraceParentError {
    #[error("traceparent is empty")]
    Empty,
    #[error("traceparent must have four dash-separated fields")]
    FieldCount,
    #[error("invalid traceparent version")]
    Version,
    #[error("invalid traceparent trace id")]
    TraceId,
    #[error("traceparent trace id is zero")]
    ZeroTraceId,
    #[error("invalid traceparent parent id")]
    ParentId,
    #[error("invalid traceparent flags")]
    Flags,
}

/// Parses a `traceparent` header, or starts a new trace when it is absent or
/// malformed.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the OS entropy source fails while
/// generating a trace id or request id.
pub fn parse_trace_parent(header: Option<&str>) -> Result<TraceInfo, DomainError> {
    let (version, trace_id, parent_id, flags) = match decode(header.unwrap_or_default()) {
        Ok(fields) => fields,
        Err(reason) => {
            debug!(%reason, "starting new trace");
            (
                DEFAULT_VERSION.to_owned(),
                random_hex(TRACE_ID_BYTES)?,
                String::new(),
                DEFAULT_FLAGS.to_owned(),
            )
        }
    };

    Ok(TraceInfo {
        version,
        trace_id,
        parent_id,
        request_id: random_hex(REQUEST_ID_BYTES)?,
        flags,
    })
}

/// Reads the trace identifiers from a carrier, or the zero value if none
/// were attached.
pub fn extract_trace_parent<C: TraceCarrier + ?Sized>(carrier: &C) -> TraceInfo {
    carrier.trace_info().cloned().unwrap_or_default()
}

fn decode(header: &str) -> Result<(String, String, String, String), TraceParentError> {
    if header.is_empty() {
        return Err(TraceParentError::Empty);
    }

    let fields: Vec<&str> = header.split('-').collect();
    let [version, trace_id, parent_id, flags] = fields.as_slice() else {
        return Err(TraceParentError::FieldCount);
    };

    if !is_hex_of_len(version, 2) {
        return Err(TraceParentError::Version);
    }
    if !is_hex_of_len(trace_id, 32) {
        return Err(TraceParentError::TraceId);
    }
    if *trace_id == ZERO_TRACE_ID {
        return Err(TraceParentError::ZeroTraceId);
    }
    if !is_hex_of_len(parent_id, 16) {
        return Err(TraceParentError::ParentId);
    }
    if !is_hex_of_len(flags, 2) {
        return Err(TraceParentError::Flags);
    }

    Ok((
        (*version).to_owned(),
        (*trace_id).to_owned(),
        (*parent_id).to_owned(),
        (*flags).to_owned(),
    ))
}

fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn random_hex(bytes: usize) -> Result<String, DomainError> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| DomainError::Infrastructure(format!("entropy source failed: {e}")))?;
    Ok(hex::encode(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const PARENT_ID: &str = "00f067aa0ba902b7";

    fn header() -> String {
        format!("00-{TRACE_ID}-{PARENT_ID}-01")
    }

    #[test]
    fn test_well_formed_header_is_inherited() {
        let info = parse_trace_parent(Some(&header())).unwrap();

        assert_eq!(info.version, "00");
        assert_eq!(info.trace_id, TRACE_ID);
        assert_eq!(info.parent_id, PARENT_ID);
        assert_eq!(info.flags, "01");
        assert_eq!(info.request_id.len(), 16);
    }

    #[test]
    fn test_round_trip_keeps_trace_and_mints_new_request_id() {
        let first = parse_trace_parent(Some(&header())).unwrap();
        let second = parse_trace_parent(Some(&header())).unwrap();

        let extracted = extract_trace_parent(&Some(first.clone()));

        assert_eq!(extracted, first);
        assert_eq!(first.trace_id, second.trace_id);
        assert_eq!(first.version, second.version);
        assert_eq!(first.flags, second.flags);
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn test_missing_header_starts_new_trace() {
        let info = parse_trace_parent(None).unwrap();

        assert_eq!(info.version, DEFAULT_VERSION);
        assert_eq!(info.flags, DEFAULT_FLAGS);
        assert_eq!(info.trace_id.len(), 32);
        assert!(info.parent_id.is_empty());
        assert_ne!(info.trace_id, ZERO_TRACE_ID);
    }

    #[test]
    fn test_malformed_headers_start_new_trace() {
        let malformed = [
            String::new(),
            "garbage".to_owned(),
            format!("0-{TRACE_ID}-{PARENT_ID}-01"),
            format!("00-{}-{PARENT_ID}-01", &TRACE_ID[..31]),
            format!("00-{ZERO_TRACE_ID}-{PARENT_ID}-01"),
            format!("00-{TRACE_ID}-{}-01", "zz".repeat(8)),
            format!("00-{TRACE_ID}-{PARENT_ID}-1"),
            format!("00-{TRACE_ID}-{PARENT_ID}-01-extra"),
        ];

        for value in &malformed {
            let info = parse_trace_parent(Some(value)).unwrap();
            assert_ne!(info.trace_id, TRACE_ID, "header {value:?} was accepted");
            assert_eq!(info.version, DEFAULT_VERSION);
            assert_eq!(info.flags, DEFAULT_FLAGS);
        }
    }

    #[test]
    fn test_decode_reports_first_invalid_field() {
        assert_eq!(
            decode(&format!("00-{ZERO_TRACE_ID}-{PARENT_ID}-01")),
            Err(TraceParentError::ZeroTraceId)
        );
        assert_eq!(
            decode(&format!("00-{TRACE_ID}-{PARENT_ID}-0g")),
            Err(TraceParentError::Flags)
        );
    }

    #[test]
    fn test_extract_without_trace_returns_zero_value() {
        let none: Option<TraceInfo> = None;
        assert_eq!(extract_trace_parent(&none), TraceInfo::default());
    }

    #[test]
    fn test_to_header_uses_request_id_as_parent() {
        let info = parse_trace_parent(Some(&header())).unwrap();

        let propagated = parse_trace_parent(Some(&info.to_header())).unwrap();

        assert_eq!(propagated.trace_id, TRACE_ID);
        assert_eq!(propagated.parent_id, info.request_id);
    }
}
