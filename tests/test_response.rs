use beacon::http::request::Version;
use beacon::http::response::{Body, Response, ResponseBuilder, StatusCode};
use beacon::http::writer::{ResponseWriter, WriteProgress, serialize_head};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    assert_eq!(StatusCode::RequestTimeout.as_u16(), 408);
    assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::BadRequest.reason_phrase(), "Bad Request");
    assert_eq!(StatusCode::Forbidden.reason_phrase(), "Forbidden");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(
        StatusCode::MethodNotAllowed.reason_phrase(),
        "Method Not Allowed"
    );
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal Server Error"
    );
}

#[test]
fn test_response_builder_basic() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(b"Hello, World!".to_vec())
        .build();

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.version, Version::Http11);
    assert!(matches!(response.body, Body::Buffer(ref b) if b == b"Hello, World!"));
}

#[test]
fn test_response_builder_auto_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(b"This is the body".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Length"), Some("16"));
    assert_eq!(response.content_length(), Some(16));
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "999")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Length"), Some("999"));
}

#[test]
fn test_response_builder_empty_body() {
    let response = ResponseBuilder::new(StatusCode::Ok).build();

    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("Content-Length"), Some("0"));
}

#[test]
fn test_error_helpers() {
    let response = Response::not_found();
    assert_eq!(response.status, StatusCode::NotFound);
    assert!(matches!(response.body, Body::Buffer(ref b) if b == b"404 Not Found\n"));
    assert_eq!(
        response.headers.get("Content-Type"),
        Some("text/plain; charset=utf-8")
    );

    let response = Response::internal_error();
    assert_eq!(response.status, StatusCode::InternalServerError);

    let response = Response::method_not_allowed();
    assert_eq!(response.status, StatusCode::MethodNotAllowed);
    assert_eq!(response.headers.get("Allow"), Some("GET, HEAD"));
}

#[test]
fn test_strip_body_keeps_content_length() {
    let mut response = Response::ok(b"helloworld".to_vec());
    response.strip_body();

    assert!(matches!(response.body, Body::Empty));
    assert_eq!(response.content_length(), Some(10));
}

#[test]
fn test_serialized_head_uses_response_version() {
    let response = Response::ok(b"x".to_vec()).with_version(Version::Http10);
    let head = String::from_utf8(serialize_head(&response)).unwrap();

    assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(head.contains("\r\nContent-Length: 1\r\n"));
}

#[test]
fn test_serialized_head_never_duplicates_connection() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Connection", "keep-alive")
        .build();
    let head = String::from_utf8(serialize_head(&response)).unwrap();

    assert_eq!(head.matches("Connection:").count(), 1);
    assert!(head.contains("Connection: close"));
}

#[test]
fn test_writer_emits_head_then_body() {
    let mut writer = ResponseWriter::new(Response::ok(b"helloworld".to_vec()));
    let mut out = Vec::new();

    assert_eq!(writer.write_to(&mut out).unwrap(), WriteProgress::Complete);

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("\r\n\r\nhelloworld"));
}
