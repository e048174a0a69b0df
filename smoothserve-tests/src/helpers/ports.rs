//! Free TCP port discovery for tests that bind real listeners

use std::net::{Ipv4Addr, TcpListener};

const MAX_ATTEMPTS: usize = 64;

/// A port that was free on 127.0.0.1 a moment ago
pub fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("no free port on 127.0.0.1")
}

/// First port of `count` consecutive ports that were all free a moment ago.
///
/// Instance slots own consecutive ports, so tests that bind instance ports
/// need a whole block.
pub fn free_port_block(count: usize) -> u16 {
    for _ in 0..MAX_ATTEMPTS {
        let base = free_port();
        if base as usize + count > u16::MAX as usize {
            continue;
        }
        let held: Vec<_> = (0..count as u16)
            .map_while(|offset| TcpListener::bind((Ipv4Addr::LOCALHOST, base + offset)).ok())
            .collect();
        if held.len() == count {
            return base;
        }
    }
    panic!("no block of {} free ports found", count);
}
