//! NTLMv2 handshake messages for HTTP `Authorization: NTLM` exchanges.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use thiserror::Error;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSION_SECURITY: u32 = 0x0008_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSION_SECURITY
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// Seconds between 1601-01-01 and the unix epoch
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NtlmError {
    #[error("challenge is not valid base64")]
    Encoding,
    #[error("challenge is too short or has a bad signature")]
    Malformed,
    #[error("expected a type 2 message, got type {0}")]
    UnexpectedType(u32),
    #[error("could not key HMAC-MD5")]
    Key,
}

/// Server challenge extracted from a type 2 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub domain: &'a str,
    pub workstation: &'a str,
}

/// Base64 type 1 message sent with the first request
pub fn negotiate_message() -> String {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
    // empty domain and workstation buffers
    msg.extend_from_slice(&[0u8; 16]);
    STANDARD.encode(msg)
}

/// Parse the base64 payload of a `WWW-Authenticate: NTLM ...` header
pub fn parse_challenge(encoded: &str) -> Result<Challenge, NtlmError> {
    let raw = STANDARD.decode(encoded.trim()).map_err(|_| NtlmError::Encoding)?;
    if raw.len() < 32 || &raw[..8] != SIGNATURE {
        return Err(NtlmError::Malformed);
    }

    let msg_type = read_u32(&raw, 8);
    if msg_type != 2 {
        return Err(NtlmError::UnexpectedType(msg_type));
    }

    let flags = read_u32(&raw, 20);
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&raw[24..32]);

    let target_info = if raw.len() >= 48 {
        let len = read_u16(&raw, 40) as usize;
        let offset = read_u32(&raw, 44) as usize;
        raw.get(offset..offset + len).ok_or(NtlmError::Malformed)?.to_vec()
    } else {
        Vec::new()
    };

    Ok(Challenge { flags, server_challenge, target_info })
}

/// Base64 type 3 message answering `challenge`
pub fn authenticate_message(credentials: &Credentials<'_>, challenge: &Challenge) -> Result<String, NtlmError> {
    let client_challenge: [u8; 8] = rand::random();
    let timestamp = filetime_now();
    Ok(STANDARD.encode(build_authenticate(credentials, challenge, client_challenge, timestamp)?))
}

fn build_authenticate(
    credentials: &Credentials<'_>,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    timestamp: u64,
) -> Result<Vec<u8>, NtlmError> {
    let ntv2_hash = ntlmv2_hash(credentials.username, credentials.password, credentials.domain)?;

    let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let nt_proof = hmac_md5(&ntv2_hash, &[&challenge.server_challenge, &blob])?;
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&blob);

    let mut lm_response = hmac_md5(&ntv2_hash, &[&challenge.server_challenge, &client_challenge])?.to_vec();
    lm_response.extend_from_slice(&client_challenge);

    let domain = utf16le(credentials.domain);
    let user = utf16le(credentials.username);
    let workstation = utf16le(credentials.workstation);

    const HEADER_LEN: usize = 64;
    let mut offset = HEADER_LEN;
    let mut header = Vec::with_capacity(HEADER_LEN);
    let mut payload = Vec::new();

    header.extend_from_slice(SIGNATURE);
    header.extend_from_slice(&3u32.to_le_bytes());

    // payload order: domain, user, workstation, lm, nt
    let lm_at = offset + domain.len() + user.len() + workstation.len();
    let nt_at = lm_at + lm_response.len();
    push_buffer(&mut header, lm_response.len(), lm_at);
    push_buffer(&mut header, nt_response.len(), nt_at);
    for field in [&domain, &user, &workstation] {
        push_buffer(&mut header, field.len(), offset);
        payload.extend_from_slice(field);
        offset += field.len();
    }
    // no session key
    push_buffer(&mut header, 0, nt_at + nt_response.len());
    header.extend_from_slice(&((challenge.flags & NEGOTIATE_FLAGS) | NEGOTIATE_UNICODE).to_le_bytes());

    payload.extend_from_slice(&lm_response);
    payload.extend_from_slice(&nt_response);

    header.extend_from_slice(&payload);
    Ok(header)
}

fn ntlmv2_hash(username: &str, password: &str, domain: &str) -> Result<[u8; 16], NtlmError> {
    let nt_hash = Md4::digest(utf16le(password));
    let identity = utf16le(&format!("{}{}", username.to_uppercase(), domain));
    hmac_md5(&nt_hash, &[&identity])
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], NtlmError> {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key).map_err(|_| NtlmError::Key)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn push_buffer(header: &mut Vec<u8>, len: usize, offset: usize) {
    header.extend_from_slice(&(len as u16).to_le_bytes());
    header.extend_from_slice(&(len as u16).to_le_bytes());
    header.extend_from_slice(&(offset as u32).to_le_bytes());
}

fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn read_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn filetime_now() -> u64 {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (unix.as_secs() + FILETIME_EPOCH_OFFSET) * 10_000_000 + u64::from(unix.subsec_nanos() / 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_message(target_info: &[u8]) -> String {
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        msg.extend_from_slice(&[0u8; 8]); // target name
        msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
        msg.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        msg.extend_from_slice(&[0u8; 8]); // reserved
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(target_info);
        STANDARD.encode(msg)
    }

    #[test]
    fn ntlmv2_hash_matches_reference_vector() {
        // MS-NLMP 4.2.4.1.1
        let hash = ntlmv2_hash("User", "Password", "Domain").unwrap();
        assert_eq!(hex::encode(hash), "0c868a403bfd7a93a3001ef22ef02e3f");
    }

    #[test]
    fn negotiate_message_has_signature_and_type() {
        let raw = STANDARD.decode(negotiate_message()).unwrap();
        assert_eq!(&raw[..8], SIGNATURE);
        assert_eq!(read_u32(&raw, 8), 1);
        assert_eq!(read_u32(&raw, 12), NEGOTIATE_FLAGS);
    }

    #[test]
    fn parses_challenge_with_target_info() {
        let info = [0x02, 0x00, 0x02, 0x00, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00];
        let challenge = parse_challenge(&challenge_message(&info)).unwrap();
        assert_eq!(challenge.server_challenge, [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        assert_eq!(challenge.target_info, info);
    }

    #[test]
    fn rejects_wrong_message_type() {
        assert_eq!(parse_challenge(&negotiate_message()), Err(NtlmError::UnexpectedType(1)));
        assert_eq!(parse_challenge("%%%"), Err(NtlmError::Encoding));
        assert_eq!(parse_challenge(&STANDARD.encode(b"short")), Err(NtlmError::Malformed));
    }

    #[test]
    fn authenticate_message_lays_out_buffers() {
        let challenge = parse_challenge(&challenge_message(&[0, 0, 0, 0])).unwrap();
        let credentials =
            Credentials { username: "User", password: "Password", domain: "Domain", workstation: "WS" };
        let raw = build_authenticate(&credentials, &challenge, [0xaa; 8], 0).unwrap();

        assert_eq!(read_u32(&raw, 8), 3);
        let user_len = read_u16(&raw, 36) as usize;
        let user_at = read_u32(&raw, 40) as usize;
        assert_eq!(&raw[user_at..user_at + user_len], utf16le("User").as_slice());

        let lm_len = read_u16(&raw, 12) as usize;
        assert_eq!(lm_len, 24);
        let nt_len = read_u16(&raw, 20) as usize;
        let nt_at = read_u32(&raw, 24) as usize;
        assert_eq!(nt_at + nt_len, raw.len());
    }
}
