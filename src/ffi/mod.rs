//! The C ABI surface.
//!
//! Every buffer parameter is a `(pointer, length)` pair; a null pointer or a
//! zero length means the argument is absent. Inputs are copied before use.
//! Every export catches panics so nothing unwinds into the host.

pub mod codec;

use std::{
    os::raw::{c_char, c_int},
    panic::{AssertUnwindSafe, catch_unwind},
};

use codec::{ValidationResult, decode, release};

use crate::bridge::{Bridge, RequestCall, ResponseCall};

const STATUS_OK: c_int = 0;
const STATUS_FAILED: c_int = 1;

fn guarded_status(f: impl FnOnce() -> c_int) -> c_int {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!("Panic caught at the C boundary");
        STATUS_FAILED
    })
}

fn guarded_result(f: impl FnOnce() -> ValidationResult) -> ValidationResult {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!("Panic caught at the C boundary");
        ValidationResult::panicked()
    })
}

/// Record the OpenAPI document (inline bytes or a file path) and build the
/// validation engines. Returns `0` on success and `1` on failure.
///
/// # Safety
///
/// Each non-null pointer must reference the given number of readable bytes
/// for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn contract_bridge_create_engine(
    spec: *const u8,
    spec_len: usize,
    log_token: *const u8,
    log_token_len: usize,
    log_url: *const u8,
    log_url_len: usize,
) -> c_int {
    guarded_status(|| {
        // SAFETY: upheld by the caller per this function's contract.
        let (spec, log_token, log_url) = unsafe {
            (
                decode(spec, spec_len),
                decode(log_token, log_token_len),
                decode(log_url, log_url_len),
            )
        };
        match Bridge::global().create_engine(spec, log_token, log_url) {
            Ok(()) => STATUS_OK,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create validation engine");
                STATUS_FAILED
            }
        }
    })
}

/// Validate a request against the contract.
///
/// # Safety
///
/// Each non-null pointer must reference the given number of readable bytes
/// for the duration of the call. A non-null `body` in the result must be
/// released with [`contract_bridge_free_buffer`].
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn contract_bridge_validate_request(
    allow_undefined_routes: *const u8,
    allow_undefined_routes_len: usize,
    body: *const u8,
    body_len: usize,
    path: *const u8,
    path_len: usize,
    method: *const u8,
    method_len: usize,
    headers_json: *const u8,
    headers_json_len: usize,
) -> ValidationResult {
    guarded_result(|| {
        // SAFETY: upheld by the caller per this function's contract.
        let call = unsafe {
            RequestCall {
                allow_undefined_routes: decode(allow_undefined_routes, allow_undefined_routes_len),
                body: decode(body, body_len),
                path: decode(path, path_len),
                method: decode(method, method_len),
                headers: decode(headers_json, headers_json_len),
            }
        };
        let adjudication = Bridge::global().validate_request(call);
        ValidationResult::new(adjudication.verdict, adjudication.body)
    })
}

/// Validate an upstream response (and route) against the contract.
///
/// # Safety
///
/// Each non-null pointer must reference the given number of readable bytes
/// for the duration of the call. A non-null `body` in the result must be
/// released with [`contract_bridge_free_buffer`].
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn contract_bridge_validate_response(
    log_url: *const u8,
    log_url_len: usize,
    log_token: *const u8,
    log_token_len: usize,
    allow_undefined_routes: *const u8,
    allow_undefined_routes_len: usize,
    request_body: *const u8,
    request_body_len: usize,
    request_headers_json: *const u8,
    request_headers_json_len: usize,
    response_body: *const u8,
    response_body_len: usize,
    response_headers_json: *const u8,
    response_headers_json_len: usize,
    path: *const u8,
    path_len: usize,
    status_code: c_int,
    method: *const u8,
    method_len: usize,
) -> ValidationResult {
    guarded_result(|| {
        // SAFETY: upheld by the caller per this function's contract.
        let call = unsafe {
            ResponseCall {
                log_url: decode(log_url, log_url_len),
                log_token: decode(log_token, log_token_len),
                allow_undefined_routes: decode(allow_undefined_routes, allow_undefined_routes_len),
                request_body: decode(request_body, request_body_len),
                request_headers: decode(request_headers_json, request_headers_json_len),
                response_body: decode(response_body, response_body_len),
                response_headers: decode(response_headers_json, response_headers_json_len),
                path: decode(path, path_len),
                status_code,
                method: decode(method, method_len),
            }
        };
        let adjudication = Bridge::global().validate_response(call);
        ValidationResult::new(adjudication.verdict, adjudication.body)
    })
}

/// Release a body returned by a validate call. Null is a no-op.
///
/// # Safety
///
/// `ptr` and `len` must be exactly the `body` and `body_len` of one
/// [`ValidationResult`], released at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn contract_bridge_free_buffer(ptr: *mut c_char, len: usize) {
    // SAFETY: upheld by the caller per this function's contract.
    unsafe { release(ptr, len) }
}

/// Queue a host-formatted NDJSON record for the collector at `url` (or the
/// configured endpoint). Returns `0` when queued and `1` otherwise.
///
/// # Safety
///
/// Each non-null pointer must reference the given number of readable bytes
/// for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn contract_bridge_ship_logs(
    body: *const u8,
    body_len: usize,
    api_key: *const u8,
    api_key_len: usize,
    url: *const u8,
    url_len: usize,
) -> c_int {
    guarded_status(|| {
        // SAFETY: upheld by the caller per this function's contract.
        let (body, api_key, url) = unsafe {
            (
                decode(body, body_len),
                decode(api_key, api_key_len),
                decode(url, url_len),
            )
        };
        match Bridge::global().ship_logs(body, api_key, url) {
            Ok(()) => STATUS_OK,
            Err(_) => STATUS_FAILED,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panics_become_failures() {
        assert_eq!(guarded_status(|| panic!("boom")), STATUS_FAILED);

        let result = guarded_result(|| panic!("boom"));
        assert_eq!(result.code, codec::RESULT_FAIL);
        assert!(!result.body.is_null());
        unsafe { release(result.body, result.body_len) };
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { contract_bridge_free_buffer(std::ptr::null_mut(), 0) };
    }
}
