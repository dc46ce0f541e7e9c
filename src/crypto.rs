//! AES-128-CBC decryption of the RAOP audio payload.
//!
//! Extends the RustCrypto block-cipher family the pack already depends on
//! for RAOP crypto (`aes::Aes128`, used directly by `jburnhams-airplay2-rs`'s
//! `RaopStreamer` alongside `ctr` for its own stream-cipher needs) with the
//! `cbc` mode crate from the same family, since the receive side needs
//! CBC decryption rather than the CTR encryption used on the transmit side.

use aes::Aes128;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use cbc::Decryptor;

type Aes128CbcDec = Decryptor<Aes128>;

/// Decrypt `data` in place with AES-128-CBC using `key`/`iv`.
///
/// Only whole 16-byte blocks are decrypted; any trailing partial block is
/// left untouched, per the standard AirPlay-ALAC convention. Returns
/// `false` (and leaves `data` unmodified) if `data` is shorter than one
/// block — the caller treats that as a decode failure and drops the
/// packet.
pub fn decrypt_audio_payload(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> bool {
    let full_len = (data.len() / 16) * 16;
    if full_len == 0 {
        return false;
    }

    let decryptor = Aes128CbcDec::new(key.into(), iv.into());
    // NoPadding: the ciphertext length is already a multiple of the block
    // size, so there's nothing to trim/verify — this only decrypts in place.
    let result = decryptor.decrypt_padded_mut::<NoPadding>(&mut data[..full_len]);
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit as _};

    fn encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
        let full_len = (data.len() / 16) * 16;
        let mut buf = data[..full_len].to_vec();
        let encryptor = cbc::Encryptor::<Aes128>::new(key.into(), iv.into());
        encryptor
            .encrypt_padded_mut::<NoPadding>(&mut buf, full_len)
            .unwrap();
        buf.extend_from_slice(&data[full_len..]);
        buf
    }

    #[test]
    fn roundtrip_full_blocks() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let plaintext = vec![7u8; 64];

        let mut ciphertext = encrypt(&key, &iv, &plaintext);
        assert!(decrypt_audio_payload(&key, &iv, &mut ciphertext));
        assert_eq!(ciphertext, plaintext);
    }

    #[test]
    fn trailing_partial_block_untouched() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let mut plaintext = vec![9u8; 32];
        plaintext.extend_from_slice(&[1, 2, 3]); // partial trailing block

        let mut data = encrypt(&key, &iv, &plaintext[..32]);
        data.extend_from_slice(&[1, 2, 3]);

        assert!(decrypt_audio_payload(&key, &iv, &mut data));
        assert_eq!(&data[..32], &plaintext[..32]);
        assert_eq!(&data[32..], &[1, 2, 3]);
    }

    #[test]
    fn too_short_is_rejected() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut data = vec![1, 2, 3];
        assert!(!decrypt_audio_payload(&key, &iv, &mut data));
    }
}
