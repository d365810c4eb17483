//! Drives the exported C functions against the process-wide bridge.
//!
//! The global bridge keeps the first spec it is given, so every test here
//! installs the same contract and runs serially.

use std::{io::Write, os::raw::c_int};

use serial_test::serial;

use super::fixtures::USERS_SPEC;
use crate::{
    engine::{ErrorPayload, TITLE_ROUTE_NOT_FOUND},
    ffi::{
        codec::{RESULT_FAIL, RESULT_PASS, ValidationResult},
        contract_bridge_create_engine, contract_bridge_free_buffer,
        contract_bridge_ship_logs, contract_bridge_validate_request,
        contract_bridge_validate_response,
    },
    verdict::TITLE_MALFORMED_INPUT,
};

/// A buffer argument: null + 0 when absent.
fn arg(value: Option<&[u8]>) -> (*const u8, usize) {
    match value {
        Some(bytes) => (bytes.as_ptr(), bytes.len()),
        None => (std::ptr::null(), 0),
    }
}

fn install_spec() {
    let (spec, spec_len) = arg(Some(USERS_SPEC.as_bytes()));
    let status = unsafe {
        contract_bridge_create_engine(spec, spec_len, std::ptr::null(), 0, std::ptr::null(), 0)
    };
    assert_eq!(status, 0);
}

/// Copy the body out of a result and release it.
fn take(result: ValidationResult) -> (c_int, Option<Vec<u8>>) {
    if result.body.is_null() {
        return (result.code, None);
    }
    let body = unsafe { std::slice::from_raw_parts(result.body as *const u8, result.body_len) }.to_vec();
    let terminator = unsafe { *result.body.add(result.body_len) };
    assert_eq!(terminator, 0, "returned buffers are NUL-terminated");
    unsafe { contract_bridge_free_buffer(result.body, result.body_len) };
    (result.code, Some(body))
}

fn validate_request(
    allow_undefined: Option<&[u8]>,
    body: Option<&[u8]>,
    path: &str,
    method: &str,
    headers: Option<&[u8]>,
) -> (c_int, Option<Vec<u8>>) {
    let (allow, allow_len) = arg(allow_undefined);
    let (body, body_len) = arg(body);
    let (path, path_len) = arg(Some(path.as_bytes()));
    let (method, method_len) = arg(Some(method.as_bytes()));
    let (headers, headers_len) = arg(headers);
    take(unsafe {
        contract_bridge_validate_request(
            allow, allow_len, body, body_len, path, path_len, method, method_len, headers,
            headers_len,
        )
    })
}

fn validate_response(
    allow_undefined: Option<&[u8]>,
    response_body: &[u8],
    response_headers: Option<&[u8]>,
    path: &str,
    status: c_int,
    method: &str,
) -> (c_int, Option<Vec<u8>>) {
    let (allow, allow_len) = arg(allow_undefined);
    let (body, body_len) = arg(Some(response_body));
    let (headers, headers_len) = arg(response_headers);
    let (path, path_len) = arg(Some(path.as_bytes()));
    let (method, method_len) = arg(Some(method.as_bytes()));
    take(unsafe {
        contract_bridge_validate_response(
            std::ptr::null(),
            0,
            std::ptr::null(),
            0,
            allow,
            allow_len,
            std::ptr::null(),
            0,
            std::ptr::null(),
            0,
            body,
            body_len,
            headers,
            headers_len,
            path,
            path_len,
            status,
            method,
            method_len,
        )
    })
}

fn payload(body: &Option<Vec<u8>>) -> ErrorPayload {
    serde_json::from_slice(body.as_deref().expect("diagnostic body")).expect("error payload JSON")
}

const JSON: &[u8] = br#"{"Content-Type":"application/json"}"#;

#[test]
#[serial]
fn test_create_engine_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(USERS_SPEC.as_bytes()).unwrap();
    let path = file.path().to_string_lossy().into_owned();

    let (spec, spec_len) = arg(Some(path.as_bytes()));
    let status = unsafe {
        contract_bridge_create_engine(spec, spec_len, std::ptr::null(), 0, std::ptr::null(), 0)
    };
    assert_eq!(status, 0);
}

#[test]
#[serial]
fn test_create_engine_without_spec_fails() {
    let status = unsafe {
        contract_bridge_create_engine(std::ptr::null(), 0, std::ptr::null(), 0, std::ptr::null(), 0)
    };
    assert_eq!(status, 1);
}

#[test]
#[serial]
fn test_valid_request_passes_with_null_body() {
    install_spec();
    let (code, body) = validate_request(
        None,
        Some(br#"{"name":"ada"}"#.as_slice()),
        "/users?dry_run=true",
        "POST",
        Some(br#"{"Content-Type":["application/json"],"X-Tenant":["acme"]}"#.as_slice()),
    );
    assert_eq!(code, RESULT_PASS);
    assert_eq!(body, None);
}

#[test]
#[serial]
fn test_invalid_request_fails_with_engine_payload() {
    install_spec();
    let (code, body) = validate_request(
        None,
        Some(br#"{"name":"ada","admin":true}"#.as_slice()),
        "/users",
        "POST",
        Some(br#"{"Content-Type":["application/json"]}"#.as_slice()),
    );
    assert_eq!(code, RESULT_FAIL);
    assert_eq!(payload(&body).code, 400);
}

#[test]
#[serial]
fn test_absent_headers_match_empty_object() {
    install_spec();
    let absent = validate_request(None, None, "/users/7", "GET", None);
    let empty = validate_request(None, None, "/users/7", "GET", Some(b"{}".as_slice()));
    assert_eq!(absent, empty);
    assert_eq!(absent.0, RESULT_PASS);
}

#[test]
#[serial]
fn test_malformed_headers_fail_without_crashing() {
    install_spec();
    let (code, body) = validate_request(None, None, "/users/7", "GET", Some(b"[1,2".as_slice()));
    assert_eq!(code, RESULT_FAIL);
    let payload = payload(&body);
    assert_eq!(payload.title, TITLE_MALFORMED_INPUT);
    assert!(payload.detail.starts_with("headers:"), "{}", payload.detail);
}

#[test]
#[serial]
fn test_undefined_route_allowed_passes() {
    install_spec();
    let (code, body) = validate_request(Some(b"true".as_slice()), None, "/nope", "GET", None);
    assert_eq!(code, RESULT_PASS);
    assert_eq!(body, None);
}

#[test]
#[serial]
fn test_undefined_route_rejected_returns_404_payload() {
    install_spec();
    let (code, body) = validate_request(Some(b"false".as_slice()), None, "/nope", "GET", None);
    assert_eq!(code, RESULT_FAIL);
    let payload = payload(&body);
    assert_eq!(payload.code, 404);
    assert_eq!(payload.title, TITLE_ROUTE_NOT_FOUND);
}

#[test]
#[serial]
fn test_response_type_mismatch_fails() {
    install_spec();
    let (code, body) = validate_response(None, br#"{"id":"abc"}"#, Some(JSON), "/users/7", 200, "GET");
    assert_eq!(code, RESULT_FAIL);
    let payload = payload(&body);
    assert!(payload.detail.contains("is not of type"), "{}", payload.detail);
}

#[test]
#[serial]
fn test_conforming_response_passes_with_supplied_body() {
    install_spec();
    let supplied = br#"{"id":7,"nickname":"ada"}"#;
    let (code, body) = validate_response(None, supplied, Some(JSON), "/users/7", 200, "GET");
    assert_eq!(code, RESULT_PASS);
    assert_eq!(body.as_deref(), Some(supplied.as_slice()));
}

#[test]
#[serial]
fn test_response_with_null_headers_passes() {
    install_spec();
    let supplied = br#"{"id":7,"nickname":null}"#;
    let (code, body) = validate_response(None, supplied, None, "/users/7", 200, "GET");
    assert_eq!(code, RESULT_PASS);
    assert_eq!(body.as_deref(), Some(supplied.as_slice()));
}

#[test]
#[serial]
fn test_response_with_null_headers_type_mismatch_fails() {
    install_spec();
    let (code, body) = validate_response(None, br#"{"id":"abc"}"#, None, "/users/7", 200, "GET");
    assert_eq!(code, RESULT_FAIL);
    let payload = payload(&body);
    assert_eq!(payload.code, 500);
    assert!(payload.detail.contains("is not of type"), "{}", payload.detail);
}

#[test]
#[serial]
fn test_undefined_route_response_allowed_returns_supplied_body() {
    install_spec();
    let supplied = br#"{"whatever":1}"#;
    let (code, body) = validate_response(Some(b"1".as_slice()), supplied, Some(JSON), "/nope", 200, "GET");
    assert_eq!(code, RESULT_PASS);
    assert_eq!(body.as_deref(), Some(supplied.as_slice()));
}

#[test]
#[serial]
fn test_undefined_route_response_rejected() {
    install_spec();
    let (code, body) = validate_response(None, br#"{"whatever":1}"#, Some(JSON), "/nope", 200, "GET");
    assert_eq!(code, RESULT_FAIL);
    assert_eq!(payload(&body).code, 404);
}

#[test]
#[serial]
fn test_out_of_range_status_fails() {
    install_spec();
    let (code, body) = validate_response(None, b"{}", Some(JSON), "/users/7", 1200, "GET");
    assert_eq!(code, RESULT_FAIL);
    assert!(payload(&body).detail.starts_with("status_code:"));
}

#[test]
#[serial]
fn test_ship_logs_without_endpoint_is_rejected() {
    let (body, body_len) = arg(Some(b"{}\n".as_slice()));
    let (key, key_len) = arg(Some(b"key".as_slice()));
    let status = unsafe { contract_bridge_ship_logs(body, body_len, key, key_len, std::ptr::null(), 0) };
    assert_eq!(status, 1);
}
