/*
    secure.rs - Noise upgrade for any Connection

    Runs a Noise XX handshake over the connection's own messages, then
    replaces it with a connection whose payloads are encrypted.

    Noise messages are capped at 65535 bytes, so application messages are
    split into chunks. Each chunk's plaintext starts with one flag byte:
    1 = more chunks follow, 0 = last chunk of the message.
*/

use super::connection::{Connection, IoGuard, CONNECTION_BUFFER};
use super::{TransportError, TransportResult};
use snow::{Builder, TransportState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Largest Noise message
const NOISE_MAX_MESSAGE: usize = 65535;

/// Plaintext bytes per chunk, leaving room for the flag byte and the AEAD tag
const CHUNK_SIZE: usize = 60_000;

const FLAG_MORE: u8 = 1;
const FLAG_LAST: u8 = 0;

fn handshake_err(e: snow::Error) -> TransportError {
    TransportError::Handshake(e.to_string())
}

/// Upgrade `conn` to an encrypted connection.
///
/// Exactly one side must pass `initiator = true`.
pub async fn secure(conn: Connection, initiator: bool, timeout: Duration) -> TransportResult<Connection> {
    let peer_id = conn.peer_id().to_string();
    match tokio::time::timeout(timeout, handshake(conn, initiator)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(format!("noise handshake with {}", peer_id))),
    }
}

async fn handshake(mut conn: Connection, initiator: bool) -> TransportResult<Connection> {
    let params = NOISE_PARAMS.parse().map_err(handshake_err)?;
    let builder = Builder::new(params);
    let keypair = builder.generate_keypair().map_err(handshake_err)?;
    let builder = builder.local_private_key(&keypair.private);
    let mut noise = if initiator {
        builder.build_initiator().map_err(handshake_err)?
    } else {
        builder.build_responder().map_err(handshake_err)?
    };

    let mut buf = vec![0u8; NOISE_MAX_MESSAGE];
    let mut payload = vec![0u8; NOISE_MAX_MESSAGE];

    // XX: -> e ; <- e, ee, s, es ; -> s, se
    let mut our_turn = initiator;
    while !noise.is_handshake_finished() {
        if our_turn {
            let len = noise.write_message(&[], &mut buf).map_err(handshake_err)?;
            conn.send(buf[..len].to_vec()).await?;
        } else {
            let msg = conn.receive().await.ok_or_else(|| {
                TransportError::Handshake(format!("{} closed during handshake", conn.peer_id()))
            })?;
            noise.read_message(&msg, &mut payload).map_err(handshake_err)?;
        }
        our_turn = !our_turn;
    }

    let transport = noise.into_transport_mode().map_err(handshake_err)?;
    debug!(peer_id = %conn.peer_id(), initiator, "Noise handshake complete");
    Ok(encrypted(conn, transport))
}

/// Wire two pump tasks between the plaintext channels and the inner connection
fn encrypted(inner: Connection, transport: TransportState) -> Connection {
    let (peer, direction, inner_tx, mut inner_rx, inner_guard) = inner.into_parts();
    let state = Arc::new(Mutex::new(transport));

    let (app_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BUFFER);
    let (in_tx, app_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BUFFER);

    let outbound_state = state.clone();
    let outbound_peer = peer.peer_id.clone();
    let outbound = tokio::spawn(async move {
        let _inner_guard = inner_guard;
        while let Some(message) = out_rx.recv().await {
            let frames = match seal(&outbound_state, &message) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(peer_id = %outbound_peer, error = %e, "Encryption failed, closing link");
                    break;
                }
            };
            for frame in frames {
                if inner_tx.send(frame).await.is_err() {
                    return;
                }
            }
        }
    });

    let inbound_peer = peer.peer_id.clone();
    let inbound = tokio::spawn(async move {
        let mut message = Vec::new();
        while let Some(frame) = inner_rx.recv().await {
            match open(&state, &frame) {
                Ok((FLAG_LAST, chunk)) => {
                    message.extend_from_slice(&chunk);
                    if in_tx.send(std::mem::take(&mut message)).await.is_err() {
                        break;
                    }
                }
                Ok((_, chunk)) => message.extend_from_slice(&chunk),
                Err(e) => {
                    warn!(peer_id = %inbound_peer, error = %e, "Decryption failed, closing link");
                    break;
                }
            }
        }
    });

    Connection::new(peer, direction, app_tx, app_rx, Arc::new(IoGuard::new(vec![outbound, inbound])))
}

fn seal(state: &Mutex<TransportState>, message: &[u8]) -> TransportResult<Vec<Vec<u8>>> {
    let mut noise = state
        .lock()
        .map_err(|_| TransportError::Connection("noise state poisoned".to_string()))?;

    let chunks: Vec<&[u8]> = if message.is_empty() {
        vec![&[][..]]
    } else {
        message.chunks(CHUNK_SIZE).collect()
    };
    let last = chunks.len() - 1;

    let mut frames = Vec::with_capacity(chunks.len());
    let mut plain = Vec::with_capacity(CHUNK_SIZE + 1);
    let mut buf = vec![0u8; NOISE_MAX_MESSAGE];
    for (i, chunk) in chunks.into_iter().enumerate() {
        plain.clear();
        plain.push(if i == last { FLAG_LAST } else { FLAG_MORE });
        plain.extend_from_slice(chunk);

        let len = noise.write_message(&plain, &mut buf).map_err(handshake_err)?;
        frames.push(buf[..len].to_vec());
    }
    Ok(frames)
}

fn open(state: &Mutex<TransportState>, frame: &[u8]) -> TransportResult<(u8, Vec<u8>)> {
    let mut noise = state
        .lock()
        .map_err(|_| TransportError::Connection("noise state poisoned".to_string()))?;

    let mut buf = vec![0u8; NOISE_MAX_MESSAGE];
    let len = noise.read_message(frame, &mut buf).map_err(handshake_err)?;
    match buf[..len].split_first() {
        Some((flag, chunk)) => Ok((*flag, chunk.to_vec())),
        None => Err(TransportError::Connection("empty noise chunk".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::transport::PeerInfo;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn secured_pair() -> (Connection, Connection) {
        let (a, b) = Connection::pair(PeerInfo::new("a", None), PeerInfo::new("b", None));
        let (a, b) = tokio::join!(secure(a, true, TIMEOUT), secure(b, false, TIMEOUT));
        (a.unwrap(), b.unwrap())
    }

    #[tokio::test]
    async fn test_encrypted_round_trip() {
        let (mut a, mut b) = secured_pair().await;

        a.send(b"secret".to_vec()).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), b"secret");

        b.send(Vec::new()).await.unwrap();
        assert_eq!(a.receive().await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_large_message_is_chunked() {
        let (a, mut b) = secured_pair().await;

        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        a.send(big.clone()).await.unwrap();
        a.send(b"after".to_vec()).await.unwrap();

        assert_eq!(b.receive().await.unwrap(), big);
        assert_eq!(b.receive().await.unwrap(), b"after");
    }

    #[tokio::test]
    async fn test_ciphertext_hides_plaintext() {
        let (a, mut tap_left) = Connection::pair(PeerInfo::new("a", None), PeerInfo::new("b", None));
        let (mut tap_right, b) = Connection::pair(PeerInfo::new("a", None), PeerInfo::new("b", None));

        // Forward both ways, recording what a sends on the wire
        let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let log = seen.clone();
        let tap = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = tap_left.receive() => {
                        log.lock().unwrap().push(msg.clone());
                        if tap_right.send(msg).await.is_err() { break; }
                    }
                    Some(msg) = tap_right.receive() => {
                        if tap_left.send(msg).await.is_err() { break; }
                    }
                    else => break,
                }
            }
        });

        let (a, b) = tokio::join!(secure(a, true, TIMEOUT), secure(b, false, TIMEOUT));
        let (a, mut b) = (a.unwrap(), b.unwrap());

        a.send(b"secret-message".to_vec()).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), b"secret-message");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3); // two handshake messages from a, one data frame
        assert!(seen.iter().all(|m| !m.windows(6).any(|w| w == b"secret")));
        tap.abort();
    }

    #[tokio::test]
    async fn test_handshake_times_out_without_peer() {
        let (a, _b) = Connection::pair(PeerInfo::new("a", None), PeerInfo::new("b", None));
        let result = secure(a, true, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_handshake_fails_when_peer_closes() {
        let (a, b) = Connection::pair(PeerInfo::new("a", None), PeerInfo::new("b", None));
        drop(b);
        let result = secure(a, true, TIMEOUT).await;
        assert!(result.is_err());
    }
}
