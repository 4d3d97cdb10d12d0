//! Property tests for the per-stream request path.

use aqm_core::{Broker, BrokerConfig, ManualEnv};
use aqm_proto::{
    Coin, DrainRequest, ErrorPayload, FetchRequest, Frame, KeyId, Opcode, Packet, Payload, Tier,
    TierCounts,
};
use aqm_server::respond;
use proptest::prelude::*;

fn broker() -> Broker<ManualEnv> {
    Broker::new(BrokerConfig::default(), ManualEnv::starting_at(1_700_000_000))
}

fn encode(payload: Payload) -> Vec<u8> {
    let frame = payload.into_frame().unwrap();
    let mut out = Vec::new();
    frame.encode(&mut out).unwrap();
    out
}

fn call(broker: &Broker<ManualEnv>, payload: Payload) -> Payload {
    let reply = respond(broker, &encode(payload)).unwrap();
    Payload::from_frame(&Frame::decode(&reply).unwrap()).unwrap()
}

fn coin(key: u64, tier: Tier) -> Coin {
    Coin {
        owner: "alice".to_string(),
        key_id: KeyId(key),
        tier,
        public_key_hex: "abcd".to_string(),
        signature_hex: "ef".to_string(),
    }
}

proptest! {
    #[test]
    fn arbitrary_bytes_get_a_valid_reply_and_change_nothing(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let broker = broker();
        let reply = respond(&broker, &bytes).unwrap();
        let payload = Payload::from_frame(&Frame::decode(&reply).unwrap()).unwrap();

        prop_assert!(!payload.opcode().is_request());
        prop_assert_eq!(broker.stats().coins, 0);
        prop_assert_eq!(broker.stats().pending_packets, 0);
    }

    #[test]
    fn published_counts_match_batch(gold in 0u64..6, silver in 0u64..6, bronze in 0u64..6) {
        let broker = broker();
        let mut coins = Vec::new();
        let mut key = 0;
        for (tier, n) in [(Tier::Gold, gold), (Tier::Silver, silver), (Tier::Bronze, bronze)] {
            for _ in 0..n {
                coins.push(coin(key, tier));
                key += 1;
            }
        }

        call(&broker, Payload::Publish(coins));
        let counts = call(&broker, Payload::Count(aqm_proto::CountRequest {
            user: "alice".to_string(),
        }));

        prop_assert_eq!(
            counts,
            Payload::Counts(TierCounts::new(gold as u32, silver as u32, bronze as u32))
        );
    }
}

#[test]
fn response_opcode_as_request_is_rejected() {
    let broker = broker();

    let reply = call(&broker, Payload::SendAck);

    assert!(matches!(
        reply,
        Payload::Error(ErrorPayload { code: ErrorPayload::UNEXPECTED_OPCODE, .. })
    ));
}

#[test]
fn fetch_for_unknown_user_is_not_found() {
    let broker = broker();

    let reply = call(
        &broker,
        Payload::Fetch(FetchRequest { user: "nobody".to_string(), tier: Tier::Gold }),
    );

    assert_eq!(reply.opcode(), Opcode::NotFound);
}

#[test]
fn send_then_drain_delivers_once() {
    let broker = broker();
    let packet = Packet {
        recipient: "bob".to_string(),
        key_id: KeyId(5),
        tier: Tier::Silver,
        ciphertext_hex: String::new(),
        payload: "hi".to_string(),
        nonce_hex: "0102".to_string(),
    };

    assert_eq!(call(&broker, Payload::Send(packet.clone())), Payload::SendAck);

    let drain = || Payload::Drain(DrainRequest { user: "bob".to_string() });
    assert_eq!(call(&broker, drain()), Payload::Mailbox(vec![packet]));
    assert_eq!(call(&broker, drain()), Payload::Mailbox(Vec::new()));
}

#[test]
fn large_mailbox_is_delivered_over_several_drains() {
    let broker = broker();
    let big = |key| Packet {
        recipient: "bob".to_string(),
        key_id: KeyId(key),
        tier: Tier::Gold,
        ciphertext_hex: String::new(),
        payload: "x".repeat(3 * 1024 * 1024),
        nonce_hex: "0102".to_string(),
    };
    broker.route(big(1)).unwrap();
    broker.route(big(2)).unwrap();

    let drain = || Payload::Drain(DrainRequest { user: "bob".to_string() });
    assert_eq!(call(&broker, drain()), Payload::Mailbox(vec![big(1)]));
    assert_eq!(broker.stats().pending_packets, 1);
    assert_eq!(call(&broker, drain()), Payload::Mailbox(vec![big(2)]));
    assert_eq!(call(&broker, drain()), Payload::Mailbox(Vec::new()));
}
