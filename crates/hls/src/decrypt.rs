use crate::error::{HlsError, HlsResult};

pub const AES128_BLOCK_SIZE: usize = 16;

pub type Aes128Key = [u8; AES128_BLOCK_SIZE];
pub type Aes128Iv = [u8; AES128_BLOCK_SIZE];

/// Whether this build can decrypt AES-128 segments at all.
pub const fn aes128_supported() -> bool {
    cfg!(feature = "aes128")
}

/// IV used when `EXT-X-KEY` carries none: the media sequence number as a
/// big-endian 128-bit integer.
pub fn sequence_iv(sequence: u64) -> Aes128Iv {
    (sequence as u128).to_be_bytes()
}

/// Parse the `IV` attribute of `EXT-X-KEY`.
///
/// The value must be `0x` prefixed. An odd number of nibbles is padded with
/// a leading zero nibble, and values shorter than 16 bytes are padded with
/// leading zero bytes.
pub fn parse_iv(value: &str) -> HlsResult<Aes128Iv> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| HlsError::InvalidIv(value.to_string()))?;

    let bytes = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))?
    } else {
        hex::decode(digits)?
    };
    if bytes.len() > AES128_BLOCK_SIZE {
        return Err(HlsError::InvalidIv(value.to_string()));
    }

    let mut iv = [0u8; AES128_BLOCK_SIZE];
    iv[AES128_BLOCK_SIZE - bytes.len()..].copy_from_slice(&bytes);
    Ok(iv)
}

pub fn key_from_bytes(bytes: &[u8]) -> HlsResult<Aes128Key> {
    bytes
        .try_into()
        .map_err(|_| HlsError::InvalidKeySize(bytes.len()))
}

/// Decrypt every whole block of `data` in place. Trailing bytes that do not
/// fill a block are left untouched.
#[cfg(feature = "aes128")]
pub fn aes128_cbc_decrypt(key: &Aes128Key, iv: &Aes128Iv, data: &mut [u8]) -> HlsResult<()> {
    use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};

    let aligned = data.len() / AES128_BLOCK_SIZE * AES128_BLOCK_SIZE;
    cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut data[..aligned])
        .map_err(|_| HlsError::DecryptionFailed)?;
    Ok(())
}

#[cfg(not(feature = "aes128"))]
pub fn aes128_cbc_decrypt(_key: &Aes128Key, _iv: &Aes128Iv, _data: &mut [u8]) -> HlsResult<()> {
    Err(HlsError::Aes128Unavailable)
}

/// Length of `data` once the PKCS#7 padding of its final block is removed.
///
/// Only the pad count in the last byte is validated.
pub fn pkcs7_unpadded_len(data: &[u8]) -> HlsResult<usize> {
    let Some(&pad) = data.last() else {
        return Ok(0);
    };
    let pad_len = pad as usize;
    if pad_len == 0 || pad_len > AES128_BLOCK_SIZE || pad_len > data.len() {
        return Err(HlsError::InvalidPadding(pad));
    }
    Ok(data.len() - pad_len)
}
