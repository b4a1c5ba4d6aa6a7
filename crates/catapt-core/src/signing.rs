//! OpenPGP clear-signing for `InRelease`.
//!
//! Keys are Ed25519 (public-key algorithm 22, curve OID 1.3.6.1.4.1.11591.15.1)
//! and signatures are v4 canonical-text signatures over SHA-256, which is what
//! apt's `gpgv` accepts.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const VERSION: u8 = 4;
const ALGO_EDDSA: u8 = 22;
const HASH_SHA256: u8 = 8;
const ED25519_OID: [u8; 9] = [0x2B, 0x06, 0x01, 0x04, 0x01, 0xDA, 0x47, 0x0F, 0x01];

const TAG_SIGNATURE: u8 = 2;
const TAG_PUBLIC_KEY: u8 = 6;
const TAG_USER_ID: u8 = 13;

const SIG_CANONICAL_TEXT: u8 = 0x01;
const SIG_POSITIVE_CERT: u8 = 0x13;

const SUB_CREATION_TIME: u8 = 2;
const SUB_ISSUER: u8 = 16;
const SUB_KEY_FLAGS: u8 = 27;
const SUB_ISSUER_FINGERPRINT: u8 = 33;

const BEGIN_SIGNED: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const BEGIN_SIGNATURE: &str = "-----BEGIN PGP SIGNATURE-----";
const END_SIGNATURE: &str = "-----END PGP SIGNATURE-----";

/// Holds the archive signing key.
pub struct Signer {
    key: SigningKey,
    created: u32,
    user_id: String,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("fingerprint", &self.fingerprint_hex())
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Key from a 32-byte Ed25519 seed. `created` is the key creation time
    /// baked into the fingerprint, so it must stay fixed for a given key.
    pub fn from_seed(seed: [u8; 32], created: u32, user_id: impl Into<String>) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
            created,
            user_id: user_id.into(),
        }
    }

    /// Key from a base64-encoded seed.
    pub fn from_base64(encoded: &str, created: u32, user_id: impl Into<String>) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::Validation(format!("signing key is not base64: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Validation(format!("signing key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_seed(seed, created, user_id))
    }

    /// Fresh random seed, base64-encoded.
    pub fn generate_seed() -> String {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        BASE64.encode(seed)
    }

    /// Public half of the key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// V4 fingerprint as upper-case hex, the way `gpg` prints it.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode_upper(self.fingerprint())
    }

    /// Clear-sign `text` with the current time.
    pub fn clear_sign(&self, text: &str) -> String {
        let now = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
        self.clear_sign_at(text, now)
    }

    /// Clear-sign `text` with a fixed signature creation time.
    pub fn clear_sign_at(&self, text: &str, when: u32) -> String {
        let mut out = String::with_capacity(text.len() + 512);
        out.push_str(BEGIN_SIGNED);
        out.push_str("\nHash: SHA256\n\n");
        for line in text.strip_suffix('\n').unwrap_or(text).split('\n') {
            if line.starts_with('-') {
                out.push_str("- ");
            }
            out.push_str(line);
            out.push('\n');
        }

        let hashed = self.hashed_area(
            SIG_CANONICAL_TEXT,
            &[
                subpacket(SUB_CREATION_TIME, &when.to_be_bytes()),
                subpacket(SUB_ISSUER_FINGERPRINT, &self.issuer_fingerprint()),
            ],
        );
        let packet = self.signature_packet(&hashed, canonical_text(text).as_bytes());
        out.push_str(&armor(BEGIN_SIGNATURE, END_SIGNATURE, &packet));
        out
    }

    /// ASCII-armored transferable public key: key, user ID and a positive
    /// self-certification. Suitable for `/etc/apt/keyrings`.
    pub fn export_public_key(&self) -> String {
        let key_body = self.public_key_body();
        let uid = self.user_id.as_bytes();

        let mut certified = Vec::with_capacity(key_body.len() + uid.len() + 8);
        certified.push(0x99);
        certified.extend_from_slice(&u16_len(key_body.len()));
        certified.extend_from_slice(&key_body);
        certified.push(0xB4);
        certified.extend_from_slice(&u32::try_from(uid.len()).unwrap_or(u32::MAX).to_be_bytes());
        certified.extend_from_slice(uid);

        let hashed = self.hashed_area(
            SIG_POSITIVE_CERT,
            &[
                subpacket(SUB_CREATION_TIME, &self.created.to_be_bytes()),
                // certify + sign
                subpacket(SUB_KEY_FLAGS, &[0x03]),
                subpacket(SUB_ISSUER_FINGERPRINT, &self.issuer_fingerprint()),
            ],
        );
        let signature = self.signature_packet(&hashed, &certified);

        let mut packets = packet(TAG_PUBLIC_KEY, &key_body);
        packets.extend(packet(TAG_USER_ID, uid));
        packets.extend(signature);
        armor(
            "-----BEGIN PGP PUBLIC KEY BLOCK-----",
            "-----END PGP PUBLIC KEY BLOCK-----",
            &packets,
        )
    }

    fn public_key_body(&self) -> Vec<u8> {
        let mut point = Vec::with_capacity(33);
        point.push(0x40);
        point.extend_from_slice(self.key.verifying_key().as_bytes());

        let mut body = vec![VERSION];
        body.extend_from_slice(&self.created.to_be_bytes());
        body.push(ALGO_EDDSA);
        body.push(ED25519_OID.len() as u8);
        body.extend_from_slice(&ED25519_OID);
        body.extend(mpi(&point));
        body
    }

    fn fingerprint(&self) -> [u8; 20] {
        let body = self.public_key_body();
        let mut hasher = Sha1::new();
        hasher.update([0x99]);
        hasher.update(u16_len(body.len()));
        hasher.update(&body);
        hasher.finalize().into()
    }

    fn issuer_fingerprint(&self) -> Vec<u8> {
        let mut data = vec![VERSION];
        data.extend_from_slice(&self.fingerprint());
        data
    }

    /// Signature header and hashed subpacket area.
    fn hashed_area(&self, sig_type: u8, subpackets: &[Vec<u8>]) -> Vec<u8> {
        let area: Vec<u8> = subpackets.concat();
        let mut out = vec![VERSION, sig_type, ALGO_EDDSA, HASH_SHA256];
        out.extend_from_slice(&u16_len(area.len()));
        out.extend(area);
        out
    }

    fn signature_packet(&self, hashed: &[u8], data: &[u8]) -> Vec<u8> {
        let digest = signature_digest(data, hashed);
        let signature = self.key.sign(&digest).to_bytes();

        let fingerprint = self.fingerprint();
        let unhashed = subpacket(SUB_ISSUER, &fingerprint[12..]);

        let mut body = hashed.to_vec();
        body.extend_from_slice(&u16_len(unhashed.len()));
        body.extend(unhashed);
        body.extend_from_slice(&digest[..2]);
        body.extend(mpi(&signature[..32]));
        body.extend(mpi(&signature[32..]));
        packet(TAG_SIGNATURE, &body)
    }
}

/// Check a clear-signed message against `key` and return the signed text,
/// each line terminated by `\n`.
pub fn verify_cleartext(message: &str, key: &VerifyingKey) -> Result<String> {
    let invalid = |what: &str| Error::Validation(format!("clear-signed message: {what}"));

    let mut lines = message.lines();
    if lines.next() != Some(BEGIN_SIGNED) {
        return Err(invalid("missing BEGIN PGP SIGNED MESSAGE"));
    }
    for header in lines.by_ref() {
        if header.is_empty() {
            break;
        }
    }

    let mut text = Vec::new();
    let mut found_signature = false;
    for line in lines.by_ref() {
        if line == BEGIN_SIGNATURE {
            found_signature = true;
            break;
        }
        text.push(line.strip_prefix("- ").unwrap_or(line));
    }
    if !found_signature {
        return Err(invalid("missing signature block"));
    }
    for header in lines.by_ref() {
        if header.is_empty() {
            break;
        }
    }
    let mut encoded = String::new();
    for line in lines {
        if line.starts_with('=') || line == END_SIGNATURE {
            break;
        }
        encoded.push_str(line.trim());
    }
    let packet_bytes = BASE64
        .decode(encoded)
        .map_err(|e| invalid(&format!("bad base64: {e}")))?;

    let body = parse_packet(&packet_bytes, TAG_SIGNATURE).ok_or_else(|| invalid("bad packet"))?;
    let parsed = parse_signature(body).ok_or_else(|| invalid("malformed signature packet"))?;
    if parsed.sig_type != SIG_CANONICAL_TEXT {
        return Err(invalid("not a canonical text signature"));
    }

    let digest = signature_digest(canonical_lines(text.iter().copied()).as_bytes(), parsed.hashed);
    if digest[..2] != parsed.left16 {
        return Err(invalid("digest prefix mismatch"));
    }
    let signature = Signature::from_bytes(&parsed.signature);
    key.verify(&digest, &signature)
        .map_err(|_| invalid("bad signature"))?;

    let mut signed = text.join("\n");
    signed.push('\n');
    Ok(signed)
}

/// Text as OpenPGP hashes it: trailing blanks stripped, CRLF line endings,
/// and no line ending after the last line.
fn canonical_text(text: &str) -> String {
    canonical_lines(text.strip_suffix('\n').unwrap_or(text).split('\n'))
}

fn canonical_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    lines
        .into_iter()
        .map(|line| line.trim_end_matches([' ', '\t', '\r']))
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn signature_digest(data: &[u8], hashed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.update(hashed);
    hasher.update([VERSION, 0xFF]);
    hasher.update(u32::try_from(hashed.len()).unwrap_or(u32::MAX).to_be_bytes());
    hasher.finalize().into()
}

fn subpacket(kind: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push((data.len() + 1) as u8);
    out.push(kind);
    out.extend_from_slice(data);
    out
}

fn u16_len(len: usize) -> [u8; 2] {
    u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes()
}

/// Multiprecision integer: bit count then big-endian magnitude.
fn mpi(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let magnitude = &bytes[start..];
    let bits = magnitude
        .first()
        .map_or(0, |&b| (magnitude.len() - 1) * 8 + (8 - b.leading_zeros() as usize));
    let mut out = Vec::with_capacity(magnitude.len() + 2);
    out.extend_from_slice(&u16_len(bits));
    out.extend_from_slice(magnitude);
    out
}

/// New-format packet.
fn packet(tag: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len();
    let mut out = vec![0xC0 | tag];
    if len < 192 {
        out.push(len as u8);
    } else if len < 8384 {
        let rest = len - 192;
        out.push(((rest >> 8) + 192) as u8);
        out.push((rest & 0xFF) as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&u32::try_from(len).unwrap_or(u32::MAX).to_be_bytes());
    }
    out.extend_from_slice(body);
    out
}

fn parse_packet(bytes: &[u8], expected_tag: u8) -> Option<&[u8]> {
    let (&header, rest) = bytes.split_first()?;
    if header != 0xC0 | expected_tag {
        return None;
    }
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = match first {
        0..192 => (first as usize, rest),
        192..224 => {
            let (&second, rest) = rest.split_first()?;
            ((((first as usize) - 192) << 8) + second as usize + 192, rest)
        }
        0xFF => {
            let len = u32::from_be_bytes(rest.get(..4)?.try_into().ok()?) as usize;
            (len, &rest[4..])
        }
        _ => return None,
    };
    rest.get(..len)
}

struct ParsedSignature<'a> {
    sig_type: u8,
    hashed: &'a [u8],
    left16: [u8; 2],
    signature: [u8; 64],
}

fn parse_signature(body: &[u8]) -> Option<ParsedSignature<'_>> {
    if body.get(..4)? != [VERSION, body[1], ALGO_EDDSA, HASH_SHA256] {
        return None;
    }
    let hashed_len = u16::from_be_bytes([*body.get(4)?, *body.get(5)?]) as usize;
    let hashed_end = 6 + hashed_len;
    let hashed = body.get(..hashed_end)?;
    let unhashed_len =
        u16::from_be_bytes([*body.get(hashed_end)?, *body.get(hashed_end + 1)?]) as usize;
    let mut pos = hashed_end + 2 + unhashed_len;
    let left16 = [*body.get(pos)?, *body.get(pos + 1)?];
    pos += 2;

    let mut signature = [0u8; 64];
    for half in signature.chunks_mut(32) {
        let bits = u16::from_be_bytes([*body.get(pos)?, *body.get(pos + 1)?]) as usize;
        let len = bits.div_ceil(8);
        if len > 32 {
            return None;
        }
        let magnitude = body.get(pos + 2..pos + 2 + len)?;
        half[32 - len..].copy_from_slice(magnitude);
        pos += 2 + len;
    }
    Some(ParsedSignature {
        sig_type: body[1],
        hashed,
        left16,
        signature,
    })
}

fn armor(begin: &str, end: &str, data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let mut out = String::with_capacity(encoded.len() + 128);
    out.push_str(begin);
    out.push_str("\n\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push('=');
    out.push_str(&BASE64.encode(&crc24(data).to_be_bytes()[1..]));
    out.push('\n');
    out.push_str(end);
    out.push('\n');
    out
}

fn crc24(data: &[u8]) -> u32 {
    let mut crc: u32 = 0x00B7_04CE;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= 0x0186_4CFB;
            }
        }
    }
    crc & 0x00FF_FFFF
}
