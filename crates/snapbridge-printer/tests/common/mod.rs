//! A scripted mock SACP printer for session tests.
//!
//! Listens on an ephemeral loopback port, decodes every inbound frame,
//! feeds it to a test-supplied responder for scripted replies, and exposes
//! the inbound stream for assertions. Accepts connections sequentially, so
//! disconnect/reconnect flows (uploads) work against one mock.

#![allow(dead_code)]

use snapbridge_printer::{ClientOptions, PrinterClient};
use snapbridge_sacp::{packet::read_packet, Packet, ATTRIBUTE_ACK};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub type Responder = Box<dyn FnMut(&Packet) -> Vec<Packet> + Send>;

pub struct MockPrinter {
    pub addr: SocketAddr,
    /// Every frame the mock read, in order, across connections.
    pub requests: mpsc::UnboundedReceiver<Packet>,
    push_tx: mpsc::UnboundedSender<Packet>,
}

impl MockPrinter {
    pub async fn start(mut responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (request_tx, requests) = mpsc::unbounded_channel();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Packet>();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                serve(stream, &mut responder, &request_tx, &mut push_rx).await;
            }
        });

        Self {
            addr,
            requests,
            push_tx,
        }
    }

    /// Inject an unsolicited frame (subscription push) into the current
    /// connection.
    pub fn push(&self, packet: Packet) {
        let _ = self.push_tx.send(packet);
    }

    /// A client wired to this mock.
    pub fn client(&self, model: &str) -> PrinterClient {
        PrinterClient::with_options(
            self.addr.ip().to_string(),
            "",
            model,
            ClientOptions {
                port: self.addr.port(),
                ..ClientOptions::default()
            },
        )
    }

    /// Wait for the next inbound frame matching the command, skipping
    /// everything else.
    pub async fn expect_request(&mut self, command_set: u8, command_id: u8) -> Packet {
        let deadline = Duration::from_secs(15);
        tokio::time::timeout(deadline, async {
            loop {
                let packet = self.requests.recv().await.expect("mock printer gone");
                if packet.command_set == command_set && packet.command_id == command_id {
                    return packet;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no 0x{command_set:02x}/0x{command_id:02x} request arrived"))
    }
}

async fn serve(
    stream: TcpStream,
    responder: &mut Responder,
    request_tx: &mpsc::UnboundedSender<Packet>,
    push_rx: &mut mpsc::UnboundedReceiver<Packet>,
) {
    let (mut read_half, mut write_half) = stream.into_split();

    // Decode frames on a dedicated task: a select arm dropping a read
    // future mid-frame would desync the stream.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(async move {
        while let Ok(packet) = read_packet(&mut read_half, Duration::from_secs(60)).await {
            if frame_tx.send(packet).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            inbound = frame_rx.recv() => {
                let Some(packet) = inbound else { break }; // client closed
                let replies = responder(&packet);
                let _ = request_tx.send(packet);
                for reply in replies {
                    if write_half.write_all(&reply.encode()).await.is_err() {
                        reader.abort();
                        return;
                    }
                }
            }
            Some(packet) = push_rx.recv() => {
                if write_half.write_all(&packet.encode()).await.is_err() {
                    break;
                }
            }
        }
    }
    reader.abort();
}

/// An acknowledgement for a request: attribute 1, same sequence and
/// command, with the given result payload.
pub fn reply(request: &Packet, data: Vec<u8>) -> Packet {
    Packet {
        receiver_id: request.sender_id,
        sender_id: request.receiver_id,
        attribute: ATTRIBUTE_ACK,
        sequence: request.sequence,
        command_set: request.command_set,
        command_id: request.command_id,
        data,
    }
}

/// A responder that acknowledges everything with result 0 (and answers the
/// handshake). Enough for connect + subscription setup.
pub fn ack_responder() -> Responder {
    Box::new(|packet: &Packet| match (packet.command_set, packet.command_id) {
        (0x01, 0x06) => Vec::new(), // disconnect is not acknowledged
        _ => vec![reply(packet, vec![0])],
    })
}

/// An unsolicited heartbeat frame with the given status byte.
pub fn heartbeat_push(status: u8) -> Packet {
    Packet {
        sender_id: 1,
        sequence: 0xFF00,
        command_set: 0x01,
        command_id: 0xA0,
        data: vec![0, status],
        ..Default::default()
    }
}

/// An extruder telemetry payload: one 17-byte record for the given head.
pub fn extruder_payload(head_id: u8, current_milli: i32, target_milli: i32) -> Vec<u8> {
    let mut data = vec![0x00, head_id, 0x01];
    data.push(0); // index
    data.extend_from_slice(&[0, 0, 0, 0]); // filament status/enable/avail/type
    data.extend_from_slice(&400i32.to_le_bytes()); // 0.4mm nozzle
    data.extend_from_slice(&current_milli.to_le_bytes());
    data.extend_from_slice(&target_milli.to_le_bytes());
    data
}
