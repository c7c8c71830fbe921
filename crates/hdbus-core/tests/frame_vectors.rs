//! Multipart frame vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use bytes::Bytes;

use hdbus_core::protocol::frame::{body_len, decode_body, encode_frame, FRAME_HEADER_LEN};

use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

#[test]
fn frame_vectors() {
    let files = [
        "frame_two_parts.json",
        "frame_single_hello.json",
        "frame_truncated_part.json",
        "frame_trailing_bytes.json",
        "frame_too_many_parts.json",
        "frame_too_short.json",
        "frame_missing_len.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let res = decode_body(Bytes::from(raw));

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert!(
                e.to_string().contains(&err.contains),
                "vector={} got={e}",
                v.description
            );
            continue;
        }

        let parts = res.expect("expected ok frame");
        let ex = v.expect.expect("missing expect block");
        let want: Vec<Vec<u8>> = ex["parts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| hex::decode(p.as_str().unwrap()).unwrap())
            .collect();
        let got: Vec<Vec<u8>> = parts.iter().map(|p| p.to_vec()).collect();
        assert_eq!(got, want, "vector={}", v.description);
    }
}

#[test]
fn encoded_vector_matches_file() {
    let v = load("frame_two_parts.json");
    let frame = encode_frame(&[Bytes::new(), Bytes::from_static(b"hi")]).unwrap();
    let len = body_len(&frame[..FRAME_HEADER_LEN]).unwrap();
    assert_eq!(len, frame.len() - FRAME_HEADER_LEN);
    assert_eq!(frame[FRAME_HEADER_LEN..].to_vec(), v.frame.decode());
}
