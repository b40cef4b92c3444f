//! Integration tests for the 3-way handshake and the first request.
//!
//! Each test assembles a trace through the public API and checks the
//! sequence and acknowledgment numbers on the resulting records.

use tcp_synth::{
    endpoint::{Direction, EndpointPair},
    packet::flags,
    scenario::{AckPolicy, AssemblerSettings, DataStep, ScenarioAssembler},
};

const CLIENT_ISN: u32 = 1_000_000;
const SERVER_ISN: u32 = 5_000_000;

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn assembler() -> ScenarioAssembler {
    let endpoints = EndpointPair::parse("192.168.1.100:49152", "10.1.1.100:80").unwrap();
    ScenarioAssembler::new(
        endpoints,
        (CLIENT_ISN, SERVER_ISN),
        AssemblerSettings::default(),
    )
    .expect("open connection")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn handshake_produces_syn_synack_ack() {
    let mut a = assembler();
    a.handshake().unwrap();
    let trace = a.finalize().unwrap();

    assert_eq!(trace.records.len(), 3);
    let [syn, syn_ack, ack] = &trace.records[..] else {
        panic!("expected three records");
    };

    assert_eq!(syn.flags(), flags::SYN);
    assert_eq!(syn.seq(), CLIENT_ISN);
    assert_eq!(syn.ack(), 0);
    assert_eq!(syn.direction(), Direction::ClientToServer);

    assert_eq!(syn_ack.flags(), flags::SYN | flags::ACK);
    assert_eq!(syn_ack.seq(), SERVER_ISN);
    assert_eq!(syn_ack.ack(), CLIENT_ISN + 1);

    assert_eq!(ack.flags(), flags::ACK);
    assert_eq!(ack.seq(), CLIENT_ISN + 1);
    assert_eq!(ack.ack(), SERVER_ISN + 1);

    assert_eq!(trace.manifest.get("syn_ack").unwrap(), 1);
    assert_eq!(trace.manifest.get("handshake_ack").unwrap(), 2);
}

#[test]
fn get_after_handshake_is_one_exact_segment() {
    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let mut a = assembler();
    a.handshake()
        .unwrap()
        .exchange(DataStep::new("get", Direction::ClientToServer, request.to_vec()).acks(AckPolicy::None))
        .unwrap();
    let trace = a.finalize().unwrap();

    assert_eq!(trace.records.len(), 4);
    let get = trace.record("get.first").unwrap();
    assert_eq!(get.payload(), request);
    assert_eq!(get.seq(), CLIENT_ISN + 1);
    assert_eq!(get.ack(), SERVER_ISN + 1);
    assert_eq!(get.flags(), flags::PSH | flags::ACK);
    assert_eq!(get.link().src, [0x02, 0x00, 192, 168, 1, 100]);
}

#[test]
fn server_ack_covers_the_request() {
    let request = b"GET / HTTP/1.1\r\n\r\n";
    let mut a = assembler();
    a.handshake()
        .unwrap()
        .exchange(DataStep::new("get", Direction::ClientToServer, request.to_vec()))
        .unwrap();
    let trace = a.finalize().unwrap();

    let ack = trace.record("get.ack").unwrap();
    assert_eq!(ack.direction(), Direction::ServerToClient);
    assert_eq!(ack.seq(), SERVER_ISN + 1);
    assert_eq!(ack.ack(), CLIENT_ISN + 1 + request.len() as u32);
    assert!(ack.payload().is_empty());
}

#[test]
fn handshake_isns_may_wrap() {
    let endpoints = EndpointPair::parse("10.0.0.1:1234", "10.0.0.2:80").unwrap();
    let mut a =
        ScenarioAssembler::new(endpoints, (u32::MAX, 7), AssemblerSettings::default()).unwrap();
    a.handshake()
        .unwrap()
        .exchange(DataStep::new("get", Direction::ClientToServer, b"abc".to_vec()))
        .unwrap();
    let trace = a.finalize().unwrap();

    assert_eq!(trace.records[1].ack(), 0);
    assert_eq!(trace.record("get.first").unwrap().seq(), 0);
    assert_eq!(trace.record("get.ack").unwrap().ack(), 3);
}
