use ciborium::value::Value;

use super::types::{Ctap2Error, cbor_get, cbor_int, expect_bytes, expect_map, iv, COSE_ALG_ES256};

pub const FLAG_UP: u8 = 0x01;
pub const FLAG_UV: u8 = 0x04;
pub const FLAG_AT: u8 = 0x40;
pub const FLAG_ED: u8 = 0x80;

const COSE_KTY_EC2: i64 = 2;
const COSE_CRV_P256: i64 = 1;
const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;

fn malformed(msg: &str) -> Ctap2Error {
    Ctap2Error::MalformedRequest(msg.to_string())
}

/// P-256 public key in COSE_Key EC2 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CosePublicKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CosePublicKey {
    /// Accepts big-integer encodings of the coordinates: leading zero bytes
    /// (including a sign byte) are stripped and the value left-padded to 32 bytes.
    pub fn from_coordinates(x: &[u8], y: &[u8]) -> Option<Self> {
        Some(Self { x: fixed_width(x)?, y: fixed_width(y)? })
    }

    /// Uncompressed SEC1 point `0x04 || x || y`.
    pub fn sec1_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(65);
        out.push(0x04);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.y);
        out
    }

    /// Canonical COSE_Key map (kty=2, alg=-7, crv=1, x, y), keys in that order.
    pub fn to_cbor(&self) -> Vec<u8> {
        let map = Value::Map(vec![
            (iv(1), iv(COSE_KTY_EC2)),
            (iv(3), iv(COSE_ALG_ES256)),
            (iv(-1), iv(COSE_CRV_P256)),
            (iv(-2), Value::Bytes(self.x.to_vec())),
            (iv(-3), Value::Bytes(self.y.to_vec())),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).expect("COSE key encoding is infallible");
        buf
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self, Ctap2Error> {
        let value: Value = ciborium::from_reader(data)
            .map_err(|e| Ctap2Error::MalformedRequest(format!("COSE key: {e}")))?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self, Ctap2Error> {
        let map = expect_map(value, "COSE key")?;
        let int_field = |key: i64| cbor_get(map, key).and_then(cbor_int);
        if int_field(1) != Some(COSE_KTY_EC2) {
            return Err(malformed("COSE key: kty must be EC2"));
        }
        if int_field(3) != Some(COSE_ALG_ES256) {
            return Err(malformed("COSE key: alg must be ES256"));
        }
        if int_field(-1) != Some(COSE_CRV_P256) {
            return Err(malformed("COSE key: crv must be P-256"));
        }
        let coord = |key: i64, name: &str| -> Result<[u8; 32], Ctap2Error> {
            let bytes = expect_bytes(
                cbor_get(map, key).ok_or_else(|| malformed("COSE key: coordinate missing"))?,
                name,
            )?;
            bytes.try_into().map_err(|_| malformed("COSE key: coordinate must be 32 bytes"))
        };
        Ok(Self { x: coord(-2, "x")?, y: coord(-3, "y")? })
    }
}

fn fixed_width(n: &[u8]) -> Option<[u8; 32]> {
    let start = n.iter().position(|&b| b != 0).unwrap_or(n.len());
    let n = &n[start..];
    if n.len() > 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out[32 - n.len()..].copy_from_slice(n);
    Some(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid:        [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key:    CosePublicKey,
}

impl AttestedCredentialData {
    pub fn to_bytes(&self) -> Vec<u8> {
        let cose_key = self.public_key.to_cbor();
        let cred_id_len = self.credential_id.len() as u16;
        let mut data = Vec::with_capacity(16 + 2 + self.credential_id.len() + cose_key.len());
        data.extend_from_slice(&self.aaguid);
        data.extend_from_slice(&cred_id_len.to_be_bytes());
        data.extend_from_slice(&self.credential_id);
        data.extend_from_slice(&cose_key);
        data
    }

    /// Parse from the front of `input`; returns the unread remainder.
    pub fn read(input: &[u8]) -> Result<(Self, &[u8]), Ctap2Error> {
        if input.len() < 18 {
            return Err(malformed("attested credential data too short"));
        }
        let aaguid: [u8; 16] = input[..16]
            .try_into()
            .map_err(|_| malformed("aaguid must be 16 bytes"))?;
        let cred_id_len = u16::from_be_bytes([input[16], input[17]]) as usize;
        let rest = &input[18..];
        if rest.len() < cred_id_len {
            return Err(malformed("credential id truncated"));
        }
        let (credential_id, mut rest) = rest.split_at(cred_id_len);
        let value: Value = ciborium::from_reader(&mut rest)
            .map_err(|e| Ctap2Error::MalformedRequest(format!("COSE key: {e}")))?;
        let public_key = CosePublicKey::from_value(&value)?;
        Ok((
            Self { aaguid, credential_id: credential_id.to_vec(), public_key },
            rest,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash:               [u8; 32],
    pub flags:                    u8,
    pub sign_count:               u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    /// `rpIdHash || flags || signCount (u32 BE) || attestedCredentialData?`.
    /// The AT flag is derived from the presence of attested data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let attested = self.attested_credential_data.as_ref().map(AttestedCredentialData::to_bytes);
        let flags = match attested {
            Some(_) => self.flags | FLAG_AT,
            None => self.flags & !FLAG_AT,
        };
        let mut data = Vec::with_capacity(HEADER_LEN + attested.as_ref().map_or(0, Vec::len));
        data.extend_from_slice(&self.rp_id_hash);
        data.push(flags);
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = attested {
            data.extend_from_slice(&attested);
        }
        data
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, Ctap2Error> {
        if data.len() < HEADER_LEN {
            return Err(malformed("authenticator data too short"));
        }
        let rp_id_hash: [u8; 32] = data[..RP_ID_HASH_LEN]
            .try_into()
            .map_err(|_| malformed("rpIdHash must be 32 bytes"))?;
        let flags = data[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);
        if flags & FLAG_ED != 0 {
            return Err(malformed("extension data is not supported"));
        }
        let mut rest = &data[HEADER_LEN..];
        let attested_credential_data = if flags & FLAG_AT != 0 {
            let (attested, remainder) = AttestedCredentialData::read(rest)?;
            rest = remainder;
            Some(attested)
        } else {
            None
        };
        if !rest.is_empty() {
            return Err(malformed("trailing bytes after authenticator data"));
        }
        Ok(Self { rp_id_hash, flags, sign_count, attested_credential_data })
    }
}
