use byteorder::{LittleEndian, WriteBytesExt};
use ctor::ctor;
use libsodium_sys;

pub const MAC_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_ABYTES as usize;
pub const KEY_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_NPUBBYTES as usize;

pub const PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_kx_PUBLICKEYBYTES as usize;
pub const SECRET_KEY_SIZE: usize = libsodium_sys::crypto_kx_SECRETKEYBYTES as usize;

const NONCE_OFFSET: usize = NONCE_SIZE - 8;

/// Initialize the sodium infrastructure
#[ctor]
fn INIT_SODIUM() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed")
        }
    }
}

#[inline]
fn nonce_to_bytes(nonce: u64) -> [u8; NONCE_SIZE] {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    (&mut nonce_bytes[NONCE_OFFSET..])
        .write_u64::<LittleEndian>(nonce)
        .expect("Error creating nonce");
    nonce_bytes
}

/// Encrypts the provided plain text into the cipher buffer. The encrypted message size will be the
/// plain text size plus the MAC size. The function will fail if the cipher slice is not large enough.
///
/// The additional data, nonce and key must match those used during decryption, the decryption will
/// fail otherwise.
#[inline]
pub fn encrypt(
    cipher: &mut [u8],
    plain: &[u8],
    additional_data: &[u8],
    nonce: u64,
    key: &[u8; KEY_SIZE],
) -> bool {
    let nonce_bytes = nonce_to_bytes(nonce);

    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "Encryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_encrypt(
            cipher.as_mut_ptr(),
            ::std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            ::std::ptr::null(),
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Decrypts the provided ciphertext into the plain buffer. The decoded message size is equal to the
/// cipher text length minus the MAC. The function will fail if the sizes do not match.
///
/// The additional data, nonce and key must match those used during encryption, the decryption will
/// fail otherwise.
#[inline]
pub fn decrypt(
    plain: &mut [u8],
    cipher: &[u8],
    additional_data: &[u8],
    nonce: u64,
    key: &[u8; KEY_SIZE],
) -> bool {
    let nonce_bytes = nonce_to_bytes(nonce);

    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "Decryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            ::std::ptr::null_mut(),
            ::std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Generates an ephemeral key-exchange key pair (public, secret).
#[inline]
pub fn kx_keypair() -> ([u8; PUBLIC_KEY_SIZE], [u8; SECRET_KEY_SIZE]) {
    let mut public = [0u8; PUBLIC_KEY_SIZE];
    let mut secret = [0u8; SECRET_KEY_SIZE];

    unsafe {
        libsodium_sys::crypto_kx_keypair(public.as_mut_ptr(), secret.as_mut_ptr());
    }

    (public, secret)
}

/// Derives the per-direction session keys for the server role of a key exchange.
/// Returns `(rx, tx)` where `rx` decrypts client-to-server traffic and `tx` encrypts
/// server-to-client traffic. Fails if the client public key is unacceptable.
#[inline]
pub fn kx_server_session_keys(
    server_public: &[u8; PUBLIC_KEY_SIZE],
    server_secret: &[u8; SECRET_KEY_SIZE],
    client_public: &[u8; PUBLIC_KEY_SIZE],
) -> Option<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
    let mut rx = [0u8; KEY_SIZE];
    let mut tx = [0u8; KEY_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_kx_server_session_keys(
            rx.as_mut_ptr(),
            tx.as_mut_ptr(),
            server_public.as_ptr(),
            server_secret.as_ptr(),
            client_public.as_ptr(),
        )
    };

    if result < 0 {
        return None;
    }

    Some((rx, tx))
}

/// Derives the per-direction session keys for the client role of a key exchange.
/// Returns `(rx, tx)`; the client's `tx` matches the server's `rx` and vice versa.
#[inline]
pub fn kx_client_session_keys(
    client_public: &[u8; PUBLIC_KEY_SIZE],
    client_secret: &[u8; SECRET_KEY_SIZE],
    server_public: &[u8; PUBLIC_KEY_SIZE],
) -> Option<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
    let mut rx = [0u8; KEY_SIZE];
    let mut tx = [0u8; KEY_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_kx_client_session_keys(
            rx.as_mut_ptr(),
            tx.as_mut_ptr(),
            client_public.as_ptr(),
            client_secret.as_ptr(),
            server_public.as_ptr(),
        )
    };

    if result < 0 {
        return None;
    }

    Some((rx, tx))
}

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);

        let plain = b"the quick brown fox";
        let ad = [7u8; 12];

        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(encrypt(&mut cipher, &plain[..], &ad, 42, &key));

        let mut decrypted = vec![0u8; plain.len()];
        assert!(decrypt(&mut decrypted, &cipher, &ad, 42, &key));

        assert_eq!(&decrypted[..], &plain[..]);
    }

    #[test]
    fn test_decrypt_fails_on_tamper() {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);

        let plain = b"payload";
        let ad = [1u8; 4];

        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(encrypt(&mut cipher, &plain[..], &ad, 0, &key));

        cipher[0] ^= 0xff;

        let mut decrypted = vec![0u8; plain.len()];
        assert!(!decrypt(&mut decrypted, &cipher, &ad, 0, &key));
    }

    #[test]
    fn test_decrypt_fails_on_nonce_mismatch() {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);

        let plain = b"payload";

        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(encrypt(&mut cipher, &plain[..], &[], 1, &key));

        let mut decrypted = vec![0u8; plain.len()];
        assert!(!decrypt(&mut decrypted, &cipher, &[], 2, &key));
    }

    #[test]
    fn test_kx_session_keys_match() {
        let (server_pk, server_sk) = kx_keypair();
        let (client_pk, client_sk) = kx_keypair();

        let (server_rx, server_tx) =
            kx_server_session_keys(&server_pk, &server_sk, &client_pk).unwrap();
        let (client_rx, client_tx) =
            kx_client_session_keys(&client_pk, &client_sk, &server_pk).unwrap();

        assert_eq!(server_rx, client_tx);
        assert_eq!(server_tx, client_rx);
    }
}
