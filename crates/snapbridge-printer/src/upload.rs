//! File upload and print-start choreography.
//!
//! Uploads cannot share the socket with the router: the transfer is a
//! multi-packet exchange driven by the printer, and the touchscreen only
//! finalizes its file index after a specific disconnect pattern. The
//! working sequence, recovered by reverse engineering:
//!
//! 1. stop the router and take the raw halves
//! 2. run the gcode post-processor on the payload
//! 3. drive the chunked transfer state machine
//! 4. disconnect twice (0x01/0x06) and close TCP - this triggers indexing
//! 5. wait out the HMI indexing window
//! 6. reconnect with retry (the firmware may refuse immediately)
//! 7. send StartScreenPrint (0xB0/0x08) on the fresh connection -
//!    on the upload connection it is silently ignored

use bytes::{BufMut, BytesMut};
use md5::{Digest, Md5};
use snapbridge_core::{ProtocolError, Result, SessionError};
use snapbridge_sacp::{
    packet::read_packet, put_bytes, put_string, Packet, ATTRIBUTE_ACK, DATA_LEN, RECEIVER_SCREEN,
};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time;
use tracing::{debug, info, warn};

use crate::client::{timed_out, ClientInner, PrinterClient, SACP_TIMEOUT};

/// Per-frame deadline during the transfer.
const UPLOAD_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the touchscreen needs to index a freshly uploaded file.
const INDEXING_DELAY: Duration = Duration::from_secs(3);

/// Clears the uploading flag on every exit path, including panics.
struct UploadGuard<'a> {
    inner: &'a ClientInner,
}

impl<'a> UploadGuard<'a> {
    fn new(inner: &'a ClientInner) -> Self {
        inner.uploading.store(true, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.inner.uploading.store(false, Ordering::SeqCst);
    }
}

impl PrinterClient {
    /// Upload gcode to the printer and start the print from the
    /// touchscreen.
    ///
    /// The payload is post-processed for the configured model before
    /// transfer. Directory components are stripped from `filename`: the
    /// printer stores files flat. While the upload holds the socket the
    /// poller keeps reporting the last known state (`is_uploading` gates
    /// its reconnect logic), and the router is restored via reconnect on
    /// every exit path.
    pub async fn upload(&self, filename: &str, data: &[u8]) -> Result<()> {
        let _guard = UploadGuard::new(&self.inner);

        // Take exclusive ownership of the socket.
        let router = self
            .inner
            .router
            .lock()
            .take()
            .ok_or(SessionError::NotConnected)?;
        self.inner.connected.store(false, Ordering::SeqCst);
        let read_half = router.stop().await.ok_or(SessionError::NotConnected)?;
        let write_half = self
            .inner
            .writer
            .lock()
            .await
            .take()
            .ok_or(SessionError::NotConnected)?;

        let flat_name = flatten_filename(filename);
        let processed = snapbridge_gcode::process(data, self.model());

        info!(
            "uploading {} ({} bytes processed) to {}",
            flat_name,
            processed.len(),
            self.ip()
        );

        let transfer_result = transfer(read_half, write_half, flat_name, &processed).await;

        // The HMI indexes the file during this window; reconnecting too
        // early aborts it.
        time::sleep(INDEXING_DELAY).await;

        let attempts = self.inner.options.upload_reconnect_attempts;
        let mut reconnected = false;
        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(()) => {
                    reconnected = true;
                    break;
                }
                Err(e) => {
                    warn!("post-upload reconnect attempt {attempt}/{attempts} failed: {e}");
                    if attempt < attempts {
                        time::sleep(self.inner.options.upload_reconnect_delay * attempt).await;
                    }
                }
            }
        }

        transfer_result?;

        if !reconnected {
            return Err(SessionError::ReconnectExhausted { attempts }.into());
        }

        // Start the print from the touchscreen. Fire-and-forget: the ack
        // is absorbed by the router as a subscription push.
        if let Err(e) = self
            .issue(RECEIVER_SCREEN, 0xB0, 0x08, Vec::new())
            .await
        {
            warn!("start screen print failed: {e}");
        }

        // Progress denominator for the poller.
        let line_count = processed.iter().filter(|&&b| b == b'\n').count() as u32;
        self.set_total_lines(line_count);

        info!("upload of {} complete, print started", flat_name);
        Ok(())
    }
}

/// The printer stores files flat; strip any directory components.
fn flatten_filename(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(filename)
}

/// Drive the chunked transfer state machine, then perform the double
/// disconnect and close the socket.
async fn transfer(
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    filename: &str,
    payload: &[u8],
) -> Result<()> {
    let chunk_count = (payload.len() / DATA_LEN) as u16 + 1;
    let md5_hex = hex::encode(Md5::digest(payload));

    let mut data = BytesMut::new();
    put_string(&mut data, filename);
    data.put_u32_le(payload.len() as u32);
    data.put_u16_le(chunk_count);
    put_string(&mut data, &md5_hex);

    let start = Packet {
        receiver_id: RECEIVER_SCREEN,
        sequence: 1,
        command_set: 0xB0,
        command_id: 0x00,
        data: data.to_vec(),
        ..Default::default()
    };
    write_all(&mut write_half, &start).await?;

    loop {
        let packet = read_packet(&mut read_half, UPLOAD_FRAME_TIMEOUT).await?;

        match (packet.command_set, packet.command_id) {
            // Transfer accepted.
            (0xB0, 0x00) => {}

            // The printer requests a chunk by index.
            (0xB0, 0x01) => {
                let reply = chunk_reply(&packet, payload, chunk_count, &md5_hex)?;
                write_all(&mut write_half, &reply).await?;
            }

            // Transfer complete.
            (0xB0, 0x02) => {
                if packet.data.first() == Some(&0) {
                    // Disconnect #1: begins the HMI indexing handshake.
                    send_disconnect(&mut write_half).await?;
                    break;
                }
                warn!("unexpected upload completion data: {:02x?}", packet.data);
            }

            // State pushes keep arriving mid-transfer; ignore them.
            _ => {}
        }
    }

    // Disconnect #2, then close. Both are required for the touchscreen to
    // index the file.
    send_disconnect(&mut write_half).await?;
    let _ = write_half.shutdown().await;

    Ok(())
}

/// Build the reply for a chunk request (0xB0/0x01): ack attribute, same
/// sequence, payload `[0, md5, chunk index, chunk bytes]`.
fn chunk_reply(
    request: &Packet,
    payload: &[u8],
    chunk_count: u16,
    md5_hex: &str,
) -> Result<Packet> {
    if request.data.len() < 4 {
        return Err(ProtocolError::InvalidSize.into());
    }
    let md5_len = u16::from_le_bytes([request.data[0], request.data[1]]) as usize;
    if request.data.len() < 2 + md5_len + 2 {
        return Err(ProtocolError::InvalidSize.into());
    }

    let index = u16::from_le_bytes([request.data[2 + md5_len], request.data[3 + md5_len]]);
    if index >= chunk_count {
        return Err(SessionError::UploadFailed {
            reason: format!("printer requested chunk {index} of {chunk_count}"),
        }
        .into());
    }

    let start = DATA_LEN * index as usize;
    let chunk = if index == chunk_count - 1 {
        &payload[start..]
    } else {
        &payload[start..start + DATA_LEN]
    };

    debug!(
        "upload: {:.1}%",
        (index + 1) as f64 / chunk_count as f64 * 100.0
    );

    let mut reply = BytesMut::new();
    reply.put_u8(0);
    put_string(&mut reply, md5_hex);
    reply.put_u16_le(index);
    put_bytes(&mut reply, chunk);

    Ok(Packet {
        receiver_id: RECEIVER_SCREEN,
        attribute: ATTRIBUTE_ACK,
        sequence: request.sequence,
        command_set: 0xB0,
        command_id: 0x01,
        data: reply.to_vec(),
        ..Default::default()
    })
}

async fn send_disconnect(write_half: &mut OwnedWriteHalf) -> Result<()> {
    let goodbye = Packet {
        receiver_id: RECEIVER_SCREEN,
        sequence: 1,
        command_set: 0x01,
        command_id: 0x06,
        ..Default::default()
    };
    write_all(write_half, &goodbye).await
}

async fn write_all(write_half: &mut OwnedWriteHalf, packet: &Packet) -> Result<()> {
    time::timeout(SACP_TIMEOUT, write_half.write_all(&packet.encode()))
        .await
        .map_err(|_| timed_out("upload write timed out"))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_flattened() {
        assert_eq!(flatten_filename("sub/dir/file.gcode"), "file.gcode");
        assert_eq!(flatten_filename("file.gcode"), "file.gcode");
        assert_eq!(flatten_filename("win\\path\\file.gcode"), "file.gcode");
        assert_eq!(flatten_filename("trailing/"), "trailing/");
    }

    #[test]
    fn chunk_reply_carries_requested_window() {
        let payload = vec![0xAB; DATA_LEN + 100];
        let chunk_count = 2;
        let md5_hex = "00112233445566778899aabbccddeeff";

        let mut req_data = BytesMut::new();
        put_string(&mut req_data, md5_hex);
        req_data.put_u16_le(1);
        let request = Packet {
            sequence: 42,
            command_set: 0xB0,
            command_id: 0x01,
            data: req_data.to_vec(),
            ..Default::default()
        };

        let reply = chunk_reply(&request, &payload, chunk_count, md5_hex).unwrap();
        assert_eq!(reply.sequence, 42);
        assert_eq!(reply.attribute, ATTRIBUTE_ACK);
        assert_eq!(reply.data[0], 0);

        // Last chunk is the remainder: 100 bytes.
        let md5_len = u16::from_le_bytes([reply.data[1], reply.data[2]]) as usize;
        let idx_off = 3 + md5_len;
        assert_eq!(
            u16::from_le_bytes([reply.data[idx_off], reply.data[idx_off + 1]]),
            1
        );
        let chunk_len = u16::from_le_bytes([reply.data[idx_off + 2], reply.data[idx_off + 3]]);
        assert_eq!(chunk_len, 100);
    }

    #[test]
    fn chunk_reply_rejects_out_of_range_index() {
        let payload = vec![0u8; 10];
        let md5_hex = "00112233445566778899aabbccddeeff";
        let mut req_data = BytesMut::new();
        put_string(&mut req_data, md5_hex);
        req_data.put_u16_le(9);
        let request = Packet {
            data: req_data.to_vec(),
            ..Default::default()
        };

        assert!(chunk_reply(&request, &payload, 1, md5_hex).is_err());
    }

    #[test]
    fn chunk_reply_rejects_truncated_request() {
        let request = Packet {
            data: vec![0xFF, 0xFF, 0x00],
            ..Default::default()
        };
        assert!(chunk_reply(&request, &[0u8; 10], 1, "ab").is_err());
    }
}
