// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_docs_in_private_items)]

//! Property-based tests for the envelope codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics the decoder (it returns `Err` instead).
//! 2. Any typed envelope survives encode -> decode.
//! 3. Relay stamping always overrides a client-supplied `from`.

use pairline_proto::codec::{self, CodecError};
use pairline_proto::envelope::{
    Envelope, IceCandidate, ScreenState, SessionDescription, Signal, StateUpdate,
};
use pairline_proto::identity::{PeerId, RoomName};
use proptest::prelude::*;

fn arb_peer_id() -> impl Strategy<Value = PeerId> {
    "c[0-9]{1,4}".prop_map(PeerId::new)
}

fn arb_signal() -> impl Strategy<Value = Signal> {
    prop_oneof![
        Just(Signal::Join {}),
        arb_peer_id().prop_map(|id| Signal::Welcome { id }),
        prop::collection::vec(arb_peer_id(), 0..4).prop_map(|ids| Signal::Peers {
            count: ids.len(),
            ids,
        }),
        any::<u64>().prop_map(|ts| Signal::Ping { ts }),
        any::<u64>().prop_map(|ts| Signal::Pong { ts }),
        ".{0,64}".prop_map(|sdp| Signal::Offer {
            sdp: SessionDescription::offer(sdp),
        }),
        ".{0,64}".prop_map(|sdp| Signal::Answer {
            sdp: SessionDescription::answer(sdp),
        }),
        (".{0,48}", proptest::option::of(0u16..8)).prop_map(|(candidate, idx)| Signal::Ice {
            candidate: IceCandidate {
                candidate,
                sdp_mid: idx.map(|i| i.to_string()),
                sdp_m_line_index: idx,
                username_fragment: None,
            },
        }),
        Just(Signal::State(StateUpdate::screen(ScreenState::On))),
        Just(Signal::State(StateUpdate::screen(ScreenState::Off))),
        Just(Signal::State(StateUpdate::request_offer())),
    ]
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (
        arb_signal(),
        proptest::option::of("[a-z0-9-]{1,12}"),
        proptest::option::of(arb_peer_id()),
        proptest::option::of(arb_peer_id()),
    )
        .prop_map(|(signal, room, sender_id, from)| Envelope {
            signal,
            room: room.map(RoomName::new),
            sender_id,
            from,
        })
}

proptest! {
    #[test]
    fn decode_never_panics(text in ".{0,256}") {
        let _ = codec::decode(&text);
        let _ = codec::decode_frame(&text);
    }

    #[test]
    fn decode_never_panics_on_typed_objects(tag in "[a-z_]{0,10}", body in "[ -~]{0,64}") {
        let text = format!(r#"{{"type":"{tag}","x":"{}"}}"#, body.replace(['"', '\\'], ""));
        let _ = codec::decode(&text);
    }

    #[test]
    fn typed_envelope_survives_codec(env in arb_envelope()) {
        let text = codec::encode(&env).unwrap();
        prop_assert!(!text.contains('\n'));
        let decoded = codec::decode(&text).unwrap();
        prop_assert_eq!(decoded, env);
    }

    #[test]
    fn stamping_overrides_spoofed_from(env in arb_envelope(), real in arb_peer_id()) {
        let text = codec::encode(&env).unwrap();
        let mut frame = codec::decode_frame(&text).unwrap();
        frame.stamp(&real, &RoomName::new("room-1"));
        let restamped = codec::decode(&frame.to_text()).unwrap();
        prop_assert_eq!(restamped.from, Some(real));
        prop_assert_eq!(restamped.room, Some(RoomName::new("room-1")));
        prop_assert_eq!(restamped.signal, env.signal);
    }
}

#[test]
fn unknown_types_are_reported_by_name() {
    let err = codec::decode(r#"{"type":"bye"}"#).unwrap_err();
    assert!(matches!(err, CodecError::UnknownType(ref t) if t == "bye"));
}
