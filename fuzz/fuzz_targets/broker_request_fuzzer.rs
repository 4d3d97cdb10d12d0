//! Fuzz target for the broker's request path
//!
//! Raw bytes go through the same `respond` call the server uses per stream.
//! Every input must produce a decodable response frame, and a request that
//! is rejected must leave the store untouched.

#![no_main]

use aqm_core::{Broker, BrokerConfig, ManualEnv};
use aqm_proto::{Frame, Payload};
use aqm_server::respond;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let broker = Broker::new(BrokerConfig::default(), ManualEnv::starting_at(1_700_000_000));

    let reply = respond(&broker, data).expect("response must encode");
    let frame = Frame::decode(&reply).expect("response must be a valid frame");
    let payload = Payload::from_frame(&frame).expect("response payload must decode");

    if matches!(payload, Payload::Error(_)) {
        let stats = broker.stats();
        assert_eq!(stats.coins, 0, "rejected request mutated inventory");
        assert_eq!(stats.pending_packets, 0, "rejected request mutated mailboxes");
    }
});
