//! Envelope encode/decode across both wire encodings.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use hdbus_core::protocol::envelope::params;
use hdbus_core::{Encoding, Envelope, HdbusError, Operation};

fn sample_envelopes() -> Vec<Envelope> {
    vec![
        Envelope::command(Operation::Status).with_param(params::DEVICE, "LED_BLUE"),
        Envelope::command(Operation::Config)
            .with_param(params::DEVICE, "POWER")
            .with_param(params::CONFIG, "3.3"),
        Envelope::command(Operation::Process)
            .with_param(params::DEVICE, "LED_ALL")
            .with_param(params::PROCESS, "START_BLINK")
            .with_param(params::TIMEOUT, "10")
            .with_param(params::RATE, "0.5"),
        Envelope::command(Operation::Notify)
            .with_param(params::REPLY, "Processed Request from Client 1\n: Status of TEMP at address 0X02 is: OFF.\n"),
        Envelope::from_parts("CMD", "BOGUS"),
    ]
}

#[test]
fn every_envelope_round_trips_under_every_encoding() {
    for enc in [Encoding::Json, Encoding::Cbor] {
        for env in sample_envelopes() {
            let env = env.with_encoding(enc);
            let bytes = env.encode().unwrap();
            let back = Envelope::decode(&bytes, enc).unwrap();
            assert_eq!(back, env, "encoding={enc}");
            assert_eq!(back.timestamp(), env.timestamp());
        }
    }
}

#[test]
fn decoding_with_the_other_scheme_fails() {
    let env = Envelope::command(Operation::Read)
        .with_param(params::DEVICE, "TEMP")
        .with_encoding(Encoding::Cbor);
    let bytes = env.encode().unwrap();
    let err = Envelope::decode(&bytes, Encoding::Json).unwrap_err();
    assert!(matches!(err, HdbusError::MalformedEnvelope(_)));
}

#[test]
fn cbor_is_more_compact_than_json() {
    let env = Envelope::command(Operation::Config)
        .with_param(params::DEVICE, "LED_RED")
        .with_param(params::CONFIG, "ON");
    let cbor = env.clone().with_encoding(Encoding::Cbor).encode().unwrap();
    let json = env.with_encoding(Encoding::Json).encode().unwrap();
    assert!(cbor.len() < json.len());
}

#[test]
fn json_from_a_foreign_peer_decodes() {
    let raw = br#"{"msg_type":"CMD","msg_val":"READ","timestamp":"2024-05-01T10:00:00.000001","params":{"DEVICE":"TEMP"}}"#;
    let env = Envelope::decode_named(raw, "json").unwrap();
    assert!(env.is_valid());
    assert_eq!(env.operation(), Some(Operation::Read));
    assert_eq!(env.param(params::DEVICE).unwrap(), "TEMP");
    assert_eq!(env.timestamp(), Some("2024-05-01T10:00:00.000001"));
}

#[test]
fn unknown_top_level_fields_are_malformed() {
    let raw = br#"{"msg_type":"CMD","msg_val":"READ","extra":1}"#;
    assert!(matches!(
        Envelope::decode(raw, Encoding::Json),
        Err(HdbusError::MalformedEnvelope(_))
    ));
}

#[test]
fn display_is_sorted_json() {
    let env = Envelope::command(Operation::Status).with_param(params::DEVICE, "TEMP");
    let shown = env.to_string();
    assert!(shown.find("msg_type").unwrap() < shown.find("timestamp").unwrap());
    assert!(shown.contains("\"DEVICE\": \"TEMP\""));
}
