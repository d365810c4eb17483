//! Buffer conversions at the C boundary.
//!
//! Inbound buffers are always copied, so the host may free them as soon as a
//! call returns. Outbound bodies are allocated here with a trailing NUL and
//! handed to the host, which returns them through
//! [`contract_bridge_free_buffer`](super::contract_bridge_free_buffer).

use std::os::raw::{c_char, c_int};

use bytes::Bytes;

use crate::{error::DecodeError, verdict::Verdict};

pub const RESULT_PASS: c_int = 0;
pub const RESULT_FAIL: c_int = 1;
pub const RESULT_ENGINE_UNAVAILABLE: c_int = 2;

/// Copy a host buffer. Null or zero-length means absent.
///
/// # Safety
///
/// When `ptr` is non-null it must point to `len` readable bytes for the
/// duration of the call.
pub unsafe fn decode(ptr: *const u8, len: usize) -> Option<Bytes> {
    if ptr.is_null() || len == 0 {
        return None;
    }
    // SAFETY: the caller guarantees `ptr` points to `len` readable bytes.
    let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
    Some(Bytes::copy_from_slice(slice))
}

/// View an optional buffer as UTF-8, naming `field` on failure.
pub fn decode_str<'a>(
    field: &'static str,
    bytes: Option<&'a [u8]>,
) -> Result<Option<&'a str>, DecodeError> {
    bytes
        .map(|b| std::str::from_utf8(b).map_err(|_| DecodeError::InvalidUtf8 { field }))
        .transpose()
}

/// Like [`decode_str`], but owned and with empty strings treated as absent.
pub fn decode_string(field: &'static str, bytes: Option<&Bytes>) -> Result<Option<String>, DecodeError> {
    Ok(decode_str(field, bytes.map(|b| b.as_ref()))?
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// Hand `bytes` to the host as a NUL-terminated buffer of `len + 1` bytes.
///
/// Returns the pointer and the length without the terminator. Interior NUL
/// bytes are kept; the host must use the length.
pub fn encode(bytes: &[u8]) -> (*mut c_char, usize) {
    let mut buffer = Vec::with_capacity(bytes.len() + 1);
    buffer.extend_from_slice(bytes);
    buffer.push(0);
    let boxed: Box<[u8]> = buffer.into_boxed_slice();
    let len = boxed.len() - 1;
    (Box::into_raw(boxed) as *mut u8 as *mut c_char, len)
}

/// Free a buffer produced by [`encode`]. Null is a no-op.
///
/// # Safety
///
/// `ptr` must come from [`encode`] with the same `len`, and must not have
/// been released before.
pub unsafe fn release(ptr: *mut c_char, len: usize) {
    if ptr.is_null() {
        return;
    }
    let slice = std::ptr::slice_from_raw_parts_mut(ptr as *mut u8, len + 1);
    // SAFETY: the caller guarantees this is the exact allocation `encode`
    // leaked, released once.
    drop(unsafe { Box::from_raw(slice) });
}

/// What a validate call returns to the host.
///
/// `body` is null exactly when there is nothing to forward; otherwise it
/// points at `body_len` bytes followed by a NUL and must be released with
/// `contract_bridge_free_buffer(body, body_len)`.
#[repr(C)]
#[derive(Debug)]
pub struct ValidationResult {
    pub code: c_int,
    pub body: *mut c_char,
    pub body_len: usize,
}

impl ValidationResult {
    /// Build the result in one step so the code and body always agree.
    pub fn new(verdict: Verdict, body: Option<Bytes>) -> Self {
        let code = match verdict {
            Verdict::Pass => RESULT_PASS,
            Verdict::Fail => RESULT_FAIL,
            Verdict::EngineUnavailable => RESULT_ENGINE_UNAVAILABLE,
        };
        // A Fail always carries a diagnostic, even an empty one.
        let body = match (verdict, body) {
            (Verdict::Pass, Some(body)) if body.is_empty() => None,
            (Verdict::Pass, body) => body,
            (_, body) => Some(body.unwrap_or_default()),
        };

        match body {
            Some(body) => {
                let (ptr, len) = encode(&body);
                Self {
                    code,
                    body: ptr,
                    body_len: len,
                }
            }
            None => Self {
                code,
                body: std::ptr::null_mut(),
                body_len: 0,
            },
        }
    }

    /// Result for a panic caught at the boundary.
    pub fn panicked() -> Self {
        Self::new(
            Verdict::Fail,
            Some(Bytes::from_static(
                br#"{"code":500,"title":"dispatch failed","detail":"internal panic in validation bridge"}"#,
            )),
        )
    }
}
