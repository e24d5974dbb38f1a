//! TSIG transaction signatures (RFC 2845)
//!
//! Signs and verifies the TSIG pseudo-record carried in the additional
//! section of UPDATE, AXFR and IXFR messages. Only the fixed algorithm
//! set below is supported; anything else is rejected with `BadAlg`.

use std::time::{SystemTime, UNIX_EPOCH};

use derive_more::{Display, Error, From};
use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::dns::buffer::{BufferError, PacketBuffer, VectorPacketBuffer};
use crate::dns::protocol::{DnsPacket, DnsRecord, ResultCode};

pub const ALGO_HMAC_MD5: &str = "hmac-md5.sig-alg.reg.int";
pub const ALGO_HMAC_SHA1: &str = "hmac-sha1";
pub const ALGO_HMAC_SHA224: &str = "hmac-sha224";
pub const ALGO_HMAC_SHA256: &str = "hmac-sha256";
pub const ALGO_HMAC_SHA384: &str = "hmac-sha384";
pub const ALGO_HMAC_SHA512: &str = "hmac-sha512";

/// Default tolerance (seconds) between a client's clock and ours.
pub const DEFAULT_FUDGE: u16 = 300;

#[derive(Debug, Display, Error, From)]
pub enum TsigError {
    #[display(fmt = "unknown key {}", _0)]
    BadKey(#[error(not(source))] String),
    #[display(fmt = "unsupported algorithm {}", _0)]
    BadAlg(#[error(not(source))] String),
    #[display(fmt = "signature outside the fudge window")]
    BadTime,
    #[display(fmt = "MAC verification failed")]
    BadSig,
    #[display(fmt = "malformed TSIG record")]
    FormatError,
    Buffer(BufferError),
    Protocol(crate::dns::protocol::ProtocolError),
}

pub type Result<T> = std::result::Result<T, TsigError>;

impl From<TsigError> for ResultCode {
    fn from(e: TsigError) -> ResultCode {
        match e {
            TsigError::BadKey(_) | TsigError::BadAlg(_) | TsigError::BadSig => {
                ResultCode::NOTAUTH
            }
            TsigError::BadTime => ResultCode::NOTAUTH,
            TsigError::FormatError => ResultCode::FORMERR,
            TsigError::Buffer(_) | TsigError::Protocol(_) => ResultCode::SERVFAIL,
        }
    }
}

/// A shared secret used to sign and verify TSIG records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsigKey {
    pub name: String,
    pub algorithm: String,
    /// Base64-encoded shared secret, as it appears in configuration.
    pub secret_b64: String,
}

impl TsigKey {
    pub fn new(name: impl Into<String>, algorithm: impl Into<String>, secret_b64: impl Into<String>) -> Self {
        TsigKey {
            name: name.into(),
            algorithm: algorithm.into(),
            secret_b64: secret_b64.into(),
        }
    }

    fn secret(&self) -> Result<Vec<u8>> {
        base64::decode(&self.secret_b64).map_err(|_| TsigError::FormatError)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

macro_rules! mac_with {
    ($alg:ty, $secret:expr, $data:expr) => {{
        let mut mac =
            Hmac::<$alg>::new_from_slice($secret).map_err(|_| TsigError::FormatError)?;
        mac.update($data);
        mac.finalize().into_bytes().to_vec()
    }};
}

/// Computes the raw HMAC over `data` for the given algorithm name.
fn compute_mac(algorithm: &str, secret: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mac = match algorithm {
        ALGO_HMAC_MD5 => mac_with!(Md5, secret, data),
        ALGO_HMAC_SHA1 => mac_with!(Sha1, secret, data),
        ALGO_HMAC_SHA224 => mac_with!(Sha224, secret, data),
        ALGO_HMAC_SHA256 => mac_with!(Sha256, secret, data),
        ALGO_HMAC_SHA384 => mac_with!(Sha384, secret, data),
        ALGO_HMAC_SHA512 => mac_with!(Sha512, secret, data),
        other => return Err(TsigError::BadAlg(other.to_string())),
    };
    Ok(mac)
}

/// Serializes the portion of a TSIG-signed message that the MAC covers:
/// the DNS message itself followed by the TSIG variables (RFC 2845 §3.4.2),
/// optionally prefixed by a prior MAC for multi-message chaining (AXFR).
fn signed_data(
    message: &[u8],
    key_name: &str,
    algorithm: &str,
    time_signed: u64,
    fudge: u16,
    error: u16,
    other_data: &[u8],
    prior_mac: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut buf = VectorPacketBuffer::new();

    if let Some(mac) = prior_mac {
        buf.write_u16(mac.len() as u16)?;
        for b in mac {
            buf.write_u8(*b)?;
        }
    }

    for b in message {
        buf.write_u8(*b)?;
    }

    buf.write_qname(key_name)?;
    buf.write_u16(255)?; // class ANY
    buf.write_u32(0)?; // ttl
    buf.write_qname(algorithm)?;
    buf.write_u48(time_signed)?;
    buf.write_u16(fudge)?;
    buf.write_u16(error)?;
    buf.write_u16(other_data.len() as u16)?;
    for b in other_data {
        buf.write_u8(*b)?;
    }

    Ok(buf.buffer)
}

/// Looks up a key by name (case-insensitive, as DNS names are).
pub fn find_key<'a>(keys: &'a [TsigKey], name: &str) -> Option<&'a TsigKey> {
    keys.iter()
        .find(|k| k.name.eq_ignore_ascii_case(name))
}

/// Appends a TSIG record to `packet` signed with `key`, then re-serializes
/// the packet with the TSIG record attached. `prior_mac` chains to a
/// previous message's MAC, as AXFR response streams require.
pub fn sign(
    packet: &mut DnsPacket,
    key: &TsigKey,
    prior_mac: Option<&[u8]>,
    max_size: usize,
) -> Result<Vec<u8>> {
    let secret = key.secret()?;
    let time_signed = now_secs();
    let original_id = packet.header.id;

    let mut unsigned_buf = VectorPacketBuffer::new();
    // Leave slack for the TSIG record itself so write() doesn't truncate it away.
    packet.write(&mut unsigned_buf, max_size.saturating_sub(200))?;
    let message = unsigned_buf.buffer;

    let to_sign = signed_data(
        &message,
        &key.name,
        &key.algorithm,
        time_signed,
        DEFAULT_FUDGE,
        0,
        &[],
        prior_mac,
    )?;
    let mac = compute_mac(&key.algorithm, &secret, &to_sign)?;

    packet.resources.push(DnsRecord::Tsig {
        name: key.name.clone(),
        algorithm: key.algorithm.clone(),
        time_signed,
        fudge: DEFAULT_FUDGE,
        mac: mac.clone(),
        original_id,
        error: 0,
        other_data: Vec::new(),
    });
    packet.header.resource_entries = packet.resources.len() as u16;

    let mut final_buf = VectorPacketBuffer::new();
    packet.write(&mut final_buf, max_size)?;

    Ok(mac)
}

/// Verifies the TSIG record found in `packet.resources`, if any, against
/// `raw` (the wire bytes the message was received as, TSIG record
/// included). Returns the MAC on success for chaining into the next
/// message of a multi-message transfer.
pub fn verify(
    packet: &DnsPacket,
    raw: &[u8],
    keys: &[TsigKey],
    prior_mac: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let tsig = packet
        .resources
        .iter()
        .find_map(|r| match r {
            DnsRecord::Tsig {
                name,
                algorithm,
                time_signed,
                fudge,
                mac,
                original_id,
                error,
                other_data,
            } => Some((
                name.clone(),
                algorithm.clone(),
                *time_signed,
                *fudge,
                mac.clone(),
                *original_id,
                *error,
                other_data.clone(),
            )),
            _ => None,
        })
        .ok_or(TsigError::FormatError)?;

    let (key_name, algorithm, time_signed, fudge, mac, original_id, error, other_data) = tsig;

    let key = find_key(keys, &key_name).ok_or_else(|| TsigError::BadKey(key_name.clone()))?;
    if !key.algorithm.eq_ignore_ascii_case(&algorithm) {
        return Err(TsigError::BadAlg(algorithm));
    }
    let secret = key.secret()?;

    let now = now_secs();
    let window = fudge as u64;
    if now.abs_diff(time_signed) > window {
        return Err(TsigError::BadTime);
    }

    // The MAC covers the message as it was on the wire minus the TSIG RR
    // itself, with the original (pre-TSIG) message ID restored.
    let message = strip_tsig_record(raw, original_id)?;

    let to_sign = signed_data(
        &message,
        &key_name,
        &algorithm,
        time_signed,
        fudge,
        error,
        &other_data,
        prior_mac,
    )?;
    let expected = compute_mac(&algorithm, &secret, &to_sign)?;

    if !bool::from(expected.ct_eq(&mac)) {
        return Err(TsigError::BadSig);
    }

    Ok(mac)
}

/// Reconstructs the message as it looked before the TSIG record was
/// appended and before the message ID was possibly rewritten, per RFC
/// 2845 §3.4.1: one fewer ARCOUNT, original ID restored, TSIG RR bytes
/// dropped from the tail.
fn strip_tsig_record(raw: &[u8], original_id: u16) -> Result<Vec<u8>> {
    if raw.len() < 12 {
        return Err(TsigError::FormatError);
    }

    let mut buffer = crate::dns::buffer::VectorPacketBuffer::new();
    buffer.buffer = raw.to_vec();
    buffer.seek(0).map_err(TsigError::Buffer)?;

    let full = DnsPacket::from_buffer(&mut buffer).map_err(|_| TsigError::FormatError)?;
    if !matches!(full.resources.last(), Some(DnsRecord::Tsig { .. })) {
        return Err(TsigError::FormatError);
    }

    // The TSIG record is always the last entry of the additional section;
    // re-emit every section except it, with ARCOUNT decremented and the
    // header ID restored to what the signer originally saw.
    let mut stripped = full.clone();
    stripped.header.id = original_id;
    stripped.resources.pop();
    stripped.header.resource_entries = stripped.resources.len() as u16;

    let mut out = VectorPacketBuffer::new();
    stripped
        .write(&mut out, 65535)
        .map_err(|_| TsigError::FormatError)?;
    Ok(out.buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType};

    fn key() -> TsigKey {
        TsigKey::new("example-key.", ALGO_HMAC_SHA256, base64::encode("super-secret-key"))
    }

    fn sample_packet() -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = 42;
        packet
            .questions
            .push(DnsQuestion::new("example.com.".to_string(), QueryType::A));
        packet
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let k = key();
        let mut packet = sample_packet();
        sign(&mut packet, &k, None, 65535).unwrap();

        let mut raw_buf = VectorPacketBuffer::new();
        packet.write(&mut raw_buf, 65535).unwrap();

        let result = verify(&packet, &raw_buf.buffer, &[k], None);
        assert!(result.is_ok());
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let k = key();
        let mut packet = sample_packet();
        sign(&mut packet, &k, None, 65535).unwrap();

        if let Some(DnsRecord::Tsig { ref mut mac, .. }) = packet.resources.last_mut() {
            mac[0] ^= 0xFF;
        }

        let mut raw_buf = VectorPacketBuffer::new();
        packet.write(&mut raw_buf, 65535).unwrap();

        let result = verify(&packet, &raw_buf.buffer, &[k], None);
        assert!(matches!(result, Err(TsigError::BadSig)));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let k = key();
        let mut packet = sample_packet();
        sign(&mut packet, &k, None, 65535).unwrap();

        let mut raw_buf = VectorPacketBuffer::new();
        packet.write(&mut raw_buf, 65535).unwrap();

        let other = TsigKey::new("other-key.", ALGO_HMAC_SHA256, base64::encode("different"));
        let result = verify(&packet, &raw_buf.buffer, &[other], None);
        assert!(matches!(result, Err(TsigError::BadKey(_))));
    }
}
