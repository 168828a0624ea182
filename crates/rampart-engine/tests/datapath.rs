//! End-to-end datapath tests: filter verdicts, stateful fast path, SNAT
//! round trips, port-pool exhaustion, flow expiry and policy flushes.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use rampart_engine::addr::{parse_cidr, PortRange};
use rampart_engine::checksum;
use rampart_engine::conntrack::NatKind;
use rampart_engine::nat::NatRule;
use rampart_engine::packet::{PROTO_TCP, PROTO_UDP};
use rampart_engine::rules::{FilterRule, Protocol, Verdict};
use rampart_engine::Engine;

fn datagram(
    protocol: u8,
    src: Ipv4Addr,
    sport: u16,
    dst: Ipv4Addr,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let l4_header = if protocol == PROTO_TCP { 20 } else { 8 };
    let total = 20 + l4_header + payload.len();
    let mut p = vec![0u8; total];
    p[0] = 0x45;
    p[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    p[8] = 64;
    p[9] = protocol;
    p[12..16].copy_from_slice(&src.octets());
    p[16..20].copy_from_slice(&dst.octets());
    p[20..22].copy_from_slice(&sport.to_be_bytes());
    p[22..24].copy_from_slice(&dport.to_be_bytes());
    if protocol == PROTO_TCP {
        p[32] = 0x50; // data offset: 5 words
        p[40..].copy_from_slice(payload);
        let sum = checksum::transport(src, dst, PROTO_TCP, &p[20..]);
        p[36..38].copy_from_slice(&sum.to_be_bytes());
    } else {
        p[24..26].copy_from_slice(&((l4_header + payload.len()) as u16).to_be_bytes());
        p[28..].copy_from_slice(payload);
        let sum = checksum::transport(src, dst, PROTO_UDP, &p[20..]);
        p[26..28].copy_from_slice(&sum.to_be_bytes());
    }
    let ip_sum = checksum::ipv4_header(&p[..20]);
    p[10..12].copy_from_slice(&ip_sum.to_be_bytes());
    p
}

fn assert_checksums_valid(p: &[u8]) {
    assert_eq!(checksum::checksum(&p[..20]), 0, "IP header checksum");
    let protocol = p[9];
    let src = Ipv4Addr::new(p[12], p[13], p[14], p[15]);
    let dst = Ipv4Addr::new(p[16], p[17], p[18], p[19]);
    let mut sum = checksum::sum_words(&src.octets());
    sum = sum.wrapping_add(checksum::sum_words(&dst.octets()));
    sum = sum.wrapping_add(u32::from(protocol));
    sum = sum.wrapping_add((p.len() - 20) as u32);
    sum = sum.wrapping_add(checksum::sum_words(&p[20..]));
    assert_eq!(checksum::fold(sum), 0, "transport checksum");
}

fn ssh_rule(log: bool) -> FilterRule {
    FilterRule {
        name: "allow-ssh".into(),
        src: parse_cidr("0.0.0.0/0").unwrap(),
        dst: parse_cidr("10.0.0.5/32").unwrap(),
        sport: PortRange::any(),
        dport: PortRange::new(22, 22).unwrap(),
        protocol: Protocol::Tcp,
        verdict: Verdict::Admit,
        log,
    }
}

#[test]
fn test_default_drop_with_explicit_admit() {
    let engine = Engine::default();
    engine.set_default(Verdict::Drop);
    engine.add_rule("", ssh_rule(true)).unwrap();

    let client = Ipv4Addr::new(172, 16, 9, 9);
    let server = Ipv4Addr::new(10, 0, 0, 5);

    let ssh = datagram(PROTO_TCP, client, 40000, server, 22, b"hello");
    assert_eq!(engine.filter(&ssh), Verdict::Admit);
    assert_eq!(engine.logs().len(), 1);
    assert_eq!(engine.connections().len(), 1);

    let http = datagram(PROTO_TCP, client, 40001, server, 80, b"GET /");
    assert_eq!(engine.filter(&http), Verdict::Drop);
    // Dropped by the default, which logs nothing.
    assert_eq!(engine.logs().len(), 1);
    assert_eq!(engine.connections().len(), 1);

    // The established flow takes the fast path; the inherited log flag
    // records the hit.
    assert_eq!(engine.filter(&ssh), Verdict::Admit);
    assert_eq!(engine.logs().len(), 2);
}

#[test]
fn test_delete_purges_rule_and_related_flows() {
    let engine = Engine::default();
    engine.set_default(Verdict::Drop);
    engine.add_rule("", ssh_rule(false)).unwrap();

    let client = Ipv4Addr::new(172, 16, 9, 9);
    let server = Ipv4Addr::new(10, 0, 0, 5);
    let ssh = datagram(PROTO_TCP, client, 40000, server, 22, b"");
    assert_eq!(engine.filter(&ssh), Verdict::Admit);
    assert_eq!(engine.connections().len(), 1);

    // Deleting the rule removes the flows it admitted, so the new policy
    // applies to the very next datagram.
    assert_eq!(engine.delete_rules("allow-ssh"), 1);
    assert!(engine.connections().is_empty());
    assert_eq!(engine.filter(&ssh), Verdict::Drop);
}

#[test]
fn test_rule_ordering_first_match_wins() {
    let engine = Engine::default();
    let mut a = FilterRule {
        name: "a".into(),
        src: parse_cidr("0.0.0.0/0").unwrap(),
        dst: parse_cidr("0.0.0.0/0").unwrap(),
        sport: PortRange::any(),
        dport: PortRange::new(1, 65535).unwrap(),
        protocol: Protocol::Tcp,
        verdict: Verdict::Admit,
        log: false,
    };
    engine.add_rule("", a.clone()).unwrap();
    a.name = "b".into();
    a.src = parse_cidr("1.2.3.0/24").unwrap();
    a.verdict = Verdict::Drop;
    engine.add_rule("a", a).unwrap();

    let from_spoofed = datagram(
        PROTO_TCP,
        Ipv4Addr::new(1, 2, 3, 4),
        5555,
        Ipv4Addr::new(9, 9, 9, 9),
        80,
        b"",
    );
    assert_eq!(engine.filter(&from_spoofed), Verdict::Admit);

    // Dropping rule `a` exposes `b`; the flow admitted under `a` is
    // flushed by the delete, so `b` now decides.
    engine.delete_rules("a");
    assert_eq!(engine.filter(&from_spoofed), Verdict::Drop);
}

#[test]
fn test_snat_round_trip() {
    let engine = Engine::default();
    engine.add_nat_rule(NatRule::new(
        parse_cidr("192.168.0.0/16").unwrap(),
        Ipv4Addr::new(203, 0, 113, 1),
        40000,
        40100,
    ));

    let host = Ipv4Addr::new(192, 168, 1, 7);
    let peer = Ipv4Addr::new(8, 8, 8, 8);
    let nat_ip = Ipv4Addr::new(203, 0, 113, 1);

    let mut query = datagram(PROTO_UDP, host, 55555, peer, 53, b"query");
    assert_eq!(engine.filter(&query), Verdict::Admit);
    assert_eq!(engine.nat_outbound(&mut query), Verdict::Admit);

    // First allocation lands one past the cursor seed.
    assert_eq!(&query[12..16], &nat_ip.octets()[..]);
    assert_eq!(u16::from_be_bytes([query[20], query[21]]), 40001);
    assert_eq!(&query[16..20], &peer.octets()[..]);
    assert_checksums_valid(&query);

    // Forward and reverse flows are paired with complementary records.
    assert_eq!(engine.connections().len(), 2);
    let snap = engine.connections().snapshot();
    let forward = snap.iter().find(|e| e.nat_kind == NatKind::Source).unwrap();
    let reverse = snap.iter().find(|e| e.nat_kind == NatKind::Dest).unwrap();
    let fwd_nat = forward.nat.unwrap();
    let rev_nat = reverse.nat.unwrap();
    assert_eq!(fwd_nat.post_ip, nat_ip);
    assert_eq!(fwd_nat.post_port, 40001);
    assert_eq!(rev_nat.pre_ip, nat_ip);
    assert_eq!(rev_nat.pre_port, 40001);
    assert_eq!(rev_nat.post_ip, host);
    assert_eq!(rev_nat.post_port, 55555);

    // The reply is translated back to the original host.
    let mut reply = datagram(PROTO_UDP, peer, 53, nat_ip, 40001, b"answer");
    assert_eq!(engine.nat_inbound(&mut reply), Verdict::Admit);
    assert_eq!(&reply[16..20], &host.octets()[..]);
    assert_eq!(u16::from_be_bytes([reply[22], reply[23]]), 55555);
    assert_eq!(&reply[12..16], &peer.octets()[..]);
    assert_checksums_valid(&reply);
}

#[test]
fn test_snat_reuses_mapping_for_follow_up() {
    let engine = Engine::default();
    engine.add_nat_rule(NatRule::new(
        parse_cidr("192.168.0.0/16").unwrap(),
        Ipv4Addr::new(203, 0, 113, 1),
        40000,
        40100,
    ));

    let host = Ipv4Addr::new(192, 168, 1, 7);
    let peer = Ipv4Addr::new(8, 8, 8, 8);

    let mut first = datagram(PROTO_TCP, host, 55555, peer, 443, b"");
    engine.filter(&first);
    engine.nat_outbound(&mut first);
    let first_port = u16::from_be_bytes([first[20], first[21]]);

    let mut second = datagram(PROTO_TCP, host, 55555, peer, 443, b"more");
    engine.filter(&second);
    engine.nat_outbound(&mut second);
    let second_port = u16::from_be_bytes([second[20], second[21]]);

    // Same flow, same mapping; no second port burned.
    assert_eq!(first_port, second_port);
    assert_eq!(engine.connections().len(), 2);
}

#[test]
fn test_port_pool_exhaustion_passes_through() {
    let engine = Engine::default();
    engine.add_nat_rule(NatRule::new(
        parse_cidr("192.168.0.0/16").unwrap(),
        Ipv4Addr::new(203, 0, 113, 1),
        40000,
        40001,
    ));

    let peer = Ipv4Addr::new(8, 8, 8, 8);
    let mut seen_ports = Vec::new();
    for host_octet in 1..=2u8 {
        let host = Ipv4Addr::new(192, 168, 1, host_octet);
        let mut p = datagram(PROTO_UDP, host, 1000, peer, 53, b"");
        assert_eq!(engine.filter(&p), Verdict::Admit);
        assert_eq!(engine.nat_outbound(&mut p), Verdict::Admit);
        assert_eq!(&p[12..16], &[203, 0, 113, 1]);
        seen_ports.push(u16::from_be_bytes([p[20], p[21]]));
    }
    seen_ports.sort_unstable();
    assert_eq!(seen_ports, [40000, 40001]);

    // The third flow finds the pool dry and leaves the datagram alone.
    let host = Ipv4Addr::new(192, 168, 1, 3);
    let mut p = datagram(PROTO_UDP, host, 1000, peer, 53, b"");
    assert_eq!(engine.filter(&p), Verdict::Admit);
    assert_eq!(engine.nat_outbound(&mut p), Verdict::Admit);
    assert_eq!(&p[12..16], &host.octets()[..]);
    assert_eq!(u16::from_be_bytes([p[20], p[21]]), 1000);

    // Port uniqueness held throughout: two SNAT flows, distinct ports.
    let snat_ports: Vec<_> = engine
        .connections()
        .snapshot()
        .iter()
        .filter(|e| e.nat_kind == NatKind::Source)
        .map(|e| e.nat.unwrap().post_port)
        .collect();
    assert_eq!(snat_ports.len(), 2);
    assert_ne!(snat_ports[0], snat_ports[1]);
}

#[test]
fn test_flow_expiry_and_re_evaluation() {
    let engine = Engine::default();
    let client = Ipv4Addr::new(172, 16, 9, 9);
    let server = Ipv4Addr::new(10, 0, 0, 5);
    let p = datagram(PROTO_TCP, client, 40000, server, 443, b"");

    assert_eq!(engine.filter(&p), Verdict::Admit);
    assert_eq!(engine.connections().len(), 1);

    // Nothing expires at the sweep cadence while the flow is fresh.
    assert_eq!(engine.sweep_at(Instant::now() + Duration::from_secs(5)), 0);
    // Past the deadline the sweep retires it.
    assert_eq!(engine.sweep_at(Instant::now() + Duration::from_secs(8)), 1);
    assert!(engine.connections().is_empty());

    // With the flow gone the rules decide again.
    engine.set_default(Verdict::Drop);
    assert_eq!(engine.filter(&p), Verdict::Drop);
}

#[test]
fn test_default_change_flushes_established_flows() {
    let engine = Engine::default();
    let server = Ipv4Addr::new(10, 0, 0, 5);
    for i in 0..50u16 {
        let client = Ipv4Addr::new(172, 16, (i / 256) as u8, (i % 256) as u8);
        let p = datagram(PROTO_TCP, client, 30000 + i, server, 443, b"");
        assert_eq!(engine.filter(&p), Verdict::Admit);
    }
    assert_eq!(engine.connections().len(), 50);

    engine.set_default(Verdict::Drop);
    assert!(engine.connections().is_empty());

    let p = datagram(
        PROTO_TCP,
        Ipv4Addr::new(172, 16, 0, 0),
        30000,
        server,
        443,
        b"",
    );
    assert_eq!(engine.filter(&p), Verdict::Drop);
}

#[test]
fn test_icmp_snat_skips_port_allocation() {
    let engine = Engine::default();
    engine.add_nat_rule(NatRule::new(
        parse_cidr("192.168.0.0/16").unwrap(),
        Ipv4Addr::new(203, 0, 113, 1),
        40000,
        40100,
    ));

    let host = Ipv4Addr::new(192, 168, 1, 7);
    let peer = Ipv4Addr::new(8, 8, 8, 8);
    let mut ping = vec![0u8; 28];
    ping[0] = 0x45;
    ping[2..4].copy_from_slice(&28u16.to_be_bytes());
    ping[8] = 64;
    ping[9] = 1; // ICMP
    ping[12..16].copy_from_slice(&host.octets());
    ping[16..20].copy_from_slice(&peer.octets());
    let sum = checksum::ipv4_header(&ping[..20]);
    ping[10..12].copy_from_slice(&sum.to_be_bytes());

    assert_eq!(engine.filter(&ping), Verdict::Admit);
    assert_eq!(engine.nat_outbound(&mut ping), Verdict::Admit);

    assert_eq!(&ping[12..16], &[203, 0, 113, 1]);
    assert_eq!(checksum::checksum(&ping[..20]), 0, "IP header checksum");

    let snap = engine.connections().snapshot();
    let forward = snap.iter().find(|e| e.nat_kind == NatKind::Source).unwrap();
    assert_eq!(forward.nat.unwrap().post_port, 0);
}
