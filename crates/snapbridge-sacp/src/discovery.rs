//! Printer discovery over UDP broadcast.
//!
//! Snapmaker printers answer the literal payload `"discover"` on UDP port
//! 20054 with an ASCII record:
//!
//! ```text
//! Snapmaker J1X123P@192.168.1.201|model:Snapmaker J1|status:IDLE|SACP:1
//! ```
//!
//! The probe broadcasts on every non-loopback IPv4 interface and collects
//! responses until the deadline.

use snapbridge_core::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, warn};

use crate::DISCOVERY_PORT;

const DISCOVERY_PAYLOAD: &[u8] = b"discover";
const RESPONSE_BUFFER: usize = 1500;

/// A printer found on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPrinter {
    pub ip: String,
    pub id: String,
    pub model: String,
    /// Whether the printer advertises SACP support.
    pub sacp: bool,
}

impl std::fmt::Display for DiscoveredPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} - {}", self.id, self.ip, self.model)
    }
}

/// Parse a discovery response record.
///
/// Records lacking `|model:` or `@` are rejected.
pub fn parse_record(resp: &[u8]) -> Option<DiscoveredPrinter> {
    let msg = std::str::from_utf8(resp).ok()?;
    if !msg.contains("|model:") || !msg.contains('@') {
        return None;
    }

    let mut parts = msg.split('|');
    let first = parts.next()?;
    let at = first.rfind('@')?;
    let id = first[..at].to_string();
    let ip = first[at + 1..].to_string();

    let model_part = parts.next()?;
    let model = model_part[model_part.find(':')? + 1..].to_string();

    Some(DiscoveredPrinter {
        ip,
        id,
        model,
        sacp: msg.contains("SACP:1"),
    })
}

/// Find Snapmaker printers on the local network.
///
/// Broadcasts on each non-loopback IPv4 interface and reads responses until
/// `timeout` elapses. Interfaces that fail to bind or send are skipped.
pub async fn discover(timeout: Duration) -> Result<Vec<DiscoveredPrinter>> {
    let mut join_set = JoinSet::new();

    for iface in if_addrs::get_if_addrs()? {
        let if_addrs::IfAddr::V4(v4) = iface.addr else {
            continue;
        };
        if v4.ip.is_loopback() {
            continue;
        }

        let name = iface.name.clone();
        join_set.spawn(async move {
            match probe_interface(v4.ip, v4.broadcast, timeout).await {
                Ok(printers) => printers,
                Err(e) => {
                    warn!("discovery probe on {name} failed: {e}");
                    Vec::new()
                }
            }
        });
    }

    let mut printers: Vec<DiscoveredPrinter> = Vec::new();
    while let Some(result) = join_set.join_next().await {
        let Ok(found) = result else { continue };
        for p in found {
            if !printers.iter().any(|existing| existing.ip == p.ip) {
                printers.push(p);
            }
        }
    }
    Ok(printers)
}

async fn probe_interface(
    local: Ipv4Addr,
    broadcast: Option<Ipv4Addr>,
    timeout: Duration,
) -> std::io::Result<Vec<DiscoveredPrinter>> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(local), 0)).await?;
    socket.set_broadcast(true)?;

    let destination = SocketAddr::new(
        IpAddr::V4(broadcast.unwrap_or(Ipv4Addr::BROADCAST)),
        DISCOVERY_PORT,
    );
    debug!("sending discovery probe from {local} to {destination}");
    socket.send_to(DISCOVERY_PAYLOAD, destination).await?;

    let mut printers = Vec::new();
    let mut buffer = vec![0u8; RESPONSE_BUFFER];
    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            recv = socket.recv_from(&mut buffer) => {
                let (len, src) = recv?;
                match parse_record(&buffer[..len]) {
                    Some(printer) => {
                        debug!("discovered {printer} via {src}");
                        printers.push(printer);
                    }
                    None => debug!("ignoring malformed discovery response from {src}"),
                }
            }
        }
    }

    Ok(printers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let resp = b"Snapmaker J1X123P@192.168.1.201|model:Snapmaker J1|status:IDLE|SACP:1";
        let p = parse_record(resp).unwrap();
        assert_eq!(p.id, "Snapmaker J1X123P");
        assert_eq!(p.ip, "192.168.1.201");
        assert_eq!(p.model, "Snapmaker J1");
        assert!(p.sacp);
    }

    #[test]
    fn parses_record_without_sacp_flag() {
        let resp = b"A350X9@10.0.0.7|model:Snapmaker A350|status:IDLE";
        let p = parse_record(resp).unwrap();
        assert_eq!(p.model, "Snapmaker A350");
        assert!(!p.sacp);
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(parse_record(b"").is_none());
        assert!(parse_record(b"garbage").is_none());
        // Missing the model field.
        assert!(parse_record(b"id@10.0.0.1|status:IDLE").is_none());
        // Missing the @ separator.
        assert!(parse_record(b"id 10.0.0.1|model:Snapmaker J1").is_none());
    }

    #[tokio::test]
    async fn probes_receive_responses() {
        // Stand up a fake printer on loopback and probe it directly.
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder_addr = responder.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, src) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"discover");
            responder
                .send_to(b"J1X9@127.0.0.1|model:Snapmaker J1|status:IDLE|SACP:1", src)
                .await
                .unwrap();
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(b"discover", responder_addr).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let p = parse_record(&buf[..len]).unwrap();
        assert_eq!(p.model, "Snapmaker J1");
    }
}
