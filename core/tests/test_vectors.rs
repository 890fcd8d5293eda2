//! Verify header parsing against the JSON vectors in `test-vectors/`.
//!
//! Each case is a raw response head and either the fields it must parse to,
//! in order, or the error it must be rejected with.

use transfer_engine::headers;
use transfer_engine::HeaderError;

fn parse_error(s: &str) -> HeaderError {
    match s {
        "missing_status_line" => HeaderError::MissingStatusLine,
        "unterminated" => HeaderError::Unterminated,
        "invalid_field" => HeaderError::InvalidField,
        "too_many_headers" => HeaderError::TooManyHeaders,
        "trailing_bytes" => HeaderError::TrailingBytes,
        other => panic!("unknown error: {other}"),
    }
}

#[test]
fn header_test_vectors() {
    let raw = include_str!("../../test-vectors/headers.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let head = case["raw"].as_str().unwrap();
        let result = headers::parse(head.as_bytes(), 100);

        if let Some(error) = case["error"].as_str() {
            assert_eq!(result.unwrap_err(), parse_error(error), "{name}");
            continue;
        }

        let parsed = result.unwrap_or_else(|err| panic!("{name}: {err}"));
        let actual: Vec<(String, String)> = parsed
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_str().unwrap().to_string()))
            .collect();
        let expected: Vec<(String, String)> = case["expected"]
            .as_array()
            .unwrap()
            .iter()
            .map(|pair| {
                let pair = pair.as_array().unwrap();
                (pair[0].as_str().unwrap().to_string(), pair[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(actual, expected, "{name}");
    }
}

#[test]
fn parsed_vectors_reserialize_to_equivalent_heads() {
    let raw = include_str!("../../test-vectors/headers.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        if case.get("error").is_some() {
            continue;
        }
        let name = case["name"].as_str().unwrap();
        let parsed = headers::parse(case["raw"].as_str().unwrap().as_bytes(), 100).unwrap();

        let mut head = b"HTTP/1.1 200 OK\r\n".to_vec();
        head.extend_from_slice(&parsed.to_bytes());
        let reparsed = headers::parse(&head, 100).unwrap();
        assert_eq!(reparsed, parsed, "{name}");
    }
}
