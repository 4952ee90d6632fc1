//! Per-connection encryption sessions. A session is bootstrapped by a
//! key-exchange round-trip the moment a socket is accepted: the server sends
//! its ephemeral public key, the client answers with its own, and both sides
//! derive per-direction session keys. From then on every eligible packet is
//! carried inside an ENCRYPTED wrapper whose sequence number doubles as the
//! AEAD nonce, giving replay defense for free. The wrapper keeps `from` and
//! `to` in the clear so the server can still route.

use chassis::crypto;
use chassis::logging;
use chassis::wire::{MessageType, Packet};
use chassis::{ClientId, SERVER_ID};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use mio::Token;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Additional data binding a wrapper to its clear header fields: the
/// ENCRYPTED type code plus `from` and `to`, big-endian.
const AD_SIZE: usize = 12;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SecurityError {
    NotEstablished,
    Replay { expected: u64, got: u64 },
    Tamper,
    Malformed,
    UnknownInner(i32),
}

/// Symmetric transform applied to wrapped payloads. The concrete cipher is
/// pluggable so the session machinery runs even with a placeholder transform.
pub trait Cipher: Send + Sync {
    /// Bytes of authentication overhead added to the plaintext.
    fn overhead(&self) -> usize;

    fn seal(
        &self,
        cipher: &mut [u8],
        plain: &[u8],
        additional_data: &[u8],
        nonce: u64,
        key: &[u8; crypto::KEY_SIZE],
    ) -> bool;

    fn open(
        &self,
        plain: &mut [u8],
        cipher: &[u8],
        additional_data: &[u8],
        nonce: u64,
        key: &[u8; crypto::KEY_SIZE],
    ) -> bool;
}

/// The production cipher: ChaCha20-Poly1305 with the sequence number as nonce.
pub struct AeadCipher;

impl Cipher for AeadCipher {
    #[inline]
    fn overhead(&self) -> usize {
        crypto::MAC_SIZE
    }

    #[inline]
    fn seal(
        &self,
        cipher: &mut [u8],
        plain: &[u8],
        additional_data: &[u8],
        nonce: u64,
        key: &[u8; crypto::KEY_SIZE],
    ) -> bool {
        crypto::encrypt(cipher, plain, additional_data, nonce, key)
    }

    #[inline]
    fn open(
        &self,
        plain: &mut [u8],
        cipher: &[u8],
        additional_data: &[u8],
        nonce: u64,
        key: &[u8; crypto::KEY_SIZE],
    ) -> bool {
        crypto::decrypt(plain, cipher, additional_data, nonce, key)
    }
}

/// Placeholder transform for tests: byte-wise XOR with the key and nonce. No
/// authentication, zero overhead.
pub struct XorCipher;

impl XorCipher {
    fn transform(output: &mut [u8], input: &[u8], nonce: u64, key: &[u8; crypto::KEY_SIZE]) -> bool {
        if output.len() != input.len() {
            return false;
        }

        for (index, byte) in input.iter().enumerate() {
            output[index] = byte ^ key[index % crypto::KEY_SIZE] ^ (nonce as u8);
        }

        true
    }
}

impl Cipher for XorCipher {
    #[inline]
    fn overhead(&self) -> usize {
        0
    }

    fn seal(
        &self,
        cipher: &mut [u8],
        plain: &[u8],
        _additional_data: &[u8],
        nonce: u64,
        key: &[u8; crypto::KEY_SIZE],
    ) -> bool {
        Self::transform(cipher, plain, nonce, key)
    }

    fn open(
        &self,
        plain: &mut [u8],
        cipher: &[u8],
        _additional_data: &[u8],
        nonce: u64,
        key: &[u8; crypto::KEY_SIZE],
    ) -> bool {
        Self::transform(plain, cipher, nonce, key)
    }
}

struct PendingExchange {
    public: [u8; crypto::PUBLIC_KEY_SIZE],
    secret: [u8; crypto::SECRET_KEY_SIZE],
}

struct Session {
    /// Decrypts client-to-server traffic.
    rx_key: [u8; crypto::KEY_SIZE],
    /// Encrypts server-to-client traffic.
    tx_key: [u8; crypto::KEY_SIZE],
    rx_sequence: AtomicU64,
    tx_sequence: AtomicU64,
    established: Instant,
}

/// Key-exchange and session-key state for every live connection.
pub struct SessionService {
    cipher: Box<dyn Cipher>,
    pending: DashMap<Token, PendingExchange>,
    sessions: DashMap<Token, Session>,
    log: logging::Logger,
}

impl SessionService {
    pub fn new(cipher: Box<dyn Cipher>, log: &logging::Logger) -> SessionService {
        SessionService {
            cipher,
            pending: DashMap::new(),
            sessions: DashMap::new(),
            log: log.new(logging::o!()),
        }
    }

    /// Starts the handshake for a freshly accepted connection: generates an
    /// ephemeral key pair, parks the secret half and returns the
    /// SERVER_KEY_EXCHANGE packet to write.
    pub fn initiate(&self, token: Token) -> Packet {
        let (public, secret) = crypto::kx_keypair();

        self.pending.insert(token, PendingExchange { public, secret });

        logging::debug!(self.log, "key exchange initiated"; "context" => "initiate", "token" => token.0);

        Packet::new(
            MessageType::ServerKeyExchange,
            SERVER_ID,
            SERVER_ID,
            Bytes::copy_from_slice(&public),
        )
    }

    /// True while the connection still owes us its key-exchange response.
    #[inline]
    pub fn is_pending(&self, token: Token) -> bool {
        self.pending.contains_key(&token)
    }

    /// Completes the handshake with the client's public key. Returns false on
    /// any failure; the caller must close the connection.
    pub fn complete(&self, token: Token, client_public: &[u8; 32]) -> bool {
        let pending = match self.pending.remove(&token) {
            Some((_, pending)) => pending,
            None => {
                logging::warn!(self.log, "key exchange response without pending exchange";
                               "context" => "complete", "token" => token.0);
                return false;
            }
        };

        let keys = crypto::kx_server_session_keys(&pending.public, &pending.secret, client_public);

        match keys {
            Some((rx_key, tx_key)) => {
                self.sessions.insert(
                    token,
                    Session {
                        rx_key,
                        tx_key,
                        rx_sequence: AtomicU64::new(0),
                        tx_sequence: AtomicU64::new(0),
                        established: Instant::now(),
                    },
                );

                logging::debug!(self.log, "session established"; "context" => "complete", "token" => token.0);
                true
            }
            None => {
                logging::warn!(self.log, "session key derivation failed";
                               "context" => "complete", "token" => token.0);
                false
            }
        }
    }

    #[inline]
    pub fn is_established(&self, token: Token) -> bool {
        self.sessions.contains_key(&token)
    }

    #[inline]
    pub fn established_at(&self, token: Token) -> Option<Instant> {
        self.sessions.get(&token).map(|session| session.established)
    }

    /// All packet types are wrapped except the four handshake legs.
    #[inline]
    pub fn should_encrypt(&self, kind: MessageType) -> bool {
        !kind.is_handshake()
    }

    /// Wraps a packet for the connection's session. Returns `None` when the
    /// connection has no established session (the packet goes out in the
    /// clear — only ever the case for handshake traffic).
    pub fn encrypt_outgoing(&self, token: Token, packet: &Packet) -> Option<Packet> {
        let session = self.sessions.get(&token)?;
        let sequence = session.tx_sequence.fetch_add(1, Ordering::SeqCst);

        let mut plain = BytesMut::with_capacity(4 + packet.payload.len());
        plain.put_i32(packet.kind.code());
        plain.put_slice(&packet.payload);

        let additional_data = additional_data(packet.from, packet.to);

        let mut sealed = vec![0u8; plain.len() + self.cipher.overhead()];
        if !self
            .cipher
            .seal(&mut sealed, &plain, &additional_data, sequence, &session.tx_key)
        {
            // Sealing only fails on size mismatches, which cannot happen here.
            panic!("Packet encryption failed");
        }

        let mut payload = BytesMut::with_capacity(8 + sealed.len());
        payload.put_u64(sequence);
        payload.put_slice(&sealed);

        Some(Packet::new(
            MessageType::Encrypted,
            packet.from,
            packet.to,
            payload.freeze(),
        ))
    }

    /// Verifies and unwraps an ENCRYPTED packet. The sequence number must be
    /// exactly the next expected one; anything else is a replay or a gap and
    /// kills the connection.
    pub fn decrypt_incoming(&self, token: Token, packet: &Packet) -> Result<Packet, SecurityError> {
        let session = self.sessions.get(&token).ok_or(SecurityError::NotEstablished)?;

        if packet.payload.len() < 8 + self.cipher.overhead() + 4 {
            return Err(SecurityError::Malformed);
        }

        let sequence = BigEndian::read_u64(&packet.payload[..8]);
        let expected = session.rx_sequence.load(Ordering::SeqCst);

        if sequence != expected {
            return Err(SecurityError::Replay { expected, got: sequence });
        }

        let ciphertext = &packet.payload[8..];
        let additional_data = additional_data(packet.from, packet.to);

        let mut plain = vec![0u8; ciphertext.len() - self.cipher.overhead()];
        if !self
            .cipher
            .open(&mut plain, ciphertext, &additional_data, sequence, &session.rx_key)
        {
            return Err(SecurityError::Tamper);
        }

        session.rx_sequence.store(expected + 1, Ordering::SeqCst);

        let inner_code = BigEndian::read_i32(&plain[..4]);
        let kind = MessageType::from_code(inner_code).ok_or(SecurityError::UnknownInner(inner_code))?;

        if kind == MessageType::Encrypted {
            return Err(SecurityError::Malformed);
        }

        Ok(Packet::new(
            kind,
            packet.from,
            packet.to,
            Bytes::copy_from_slice(&plain[4..]),
        ))
    }

    /// Drops all key material for a closed connection.
    pub fn on_closed(&self, token: Token) {
        self.pending.remove(&token);
        self.sessions.remove(&token);
    }

    #[cfg(test)]
    pub(crate) fn install_session_keys(
        &self,
        token: Token,
        rx_key: [u8; crypto::KEY_SIZE],
        tx_key: [u8; crypto::KEY_SIZE],
    ) {
        self.sessions.insert(
            token,
            Session {
                rx_key,
                tx_key,
                rx_sequence: AtomicU64::new(0),
                tx_sequence: AtomicU64::new(0),
                established: Instant::now(),
            },
        );
    }
}

#[inline]
fn additional_data(from: ClientId, to: ClientId) -> [u8; AD_SIZE] {
    let mut additional_data = [0u8; AD_SIZE];

    BigEndian::write_i32(&mut additional_data[0..4], MessageType::Encrypted.code());
    BigEndian::write_u32(&mut additional_data[4..8], from);
    BigEndian::write_u32(&mut additional_data[8..12], to);

    additional_data
}
