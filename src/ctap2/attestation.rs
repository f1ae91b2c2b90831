use ciborium::value::Value;

use super::types::{
    Ctap2Error, CredentialDescriptor, UserEntity, COSE_ALG_ES256,
    cbor_get, cbor_get_str, cbor_int, encode_value, expect_bytes, expect_map, expect_text,
    iv, parse_cbor, tv,
};

pub const FMT_PACKED: &str = "packed";

fn malformed(msg: &str) -> Ctap2Error {
    Ctap2Error::MalformedRequest(msg.to_string())
}

/// Self-attestation statement: ECDSA signature over `authData || clientDataHash`
/// made with the credential's own key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationStatement {
    pub alg: i64,
    pub sig: Vec<u8>,
}

impl AttestationStatement {
    pub fn es256(sig: Vec<u8>) -> Self {
        Self { alg: COSE_ALG_ES256, sig }
    }

    fn to_value(&self) -> Value {
        Value::Map(vec![
            (tv("alg"), iv(self.alg)),
            (tv("sig"), Value::Bytes(self.sig.clone())),
        ])
    }

    fn from_value(v: &Value) -> Result<Self, Ctap2Error> {
        let m = expect_map(v, "attStmt")?;
        let alg = cbor_get_str(m, "alg")
            .and_then(cbor_int)
            .ok_or_else(|| malformed("attStmt.alg missing or not an integer"))?;
        let sig = expect_bytes(
            cbor_get_str(m, "sig").ok_or_else(|| malformed("attStmt.sig missing"))?,
            "attStmt.sig",
        )?
        .to_vec();
        Ok(Self { alg, sig })
    }
}

/// MakeCredential response: `{1: fmt, 2: authData, 3: attStmt}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCredentialResponse {
    pub fmt:       String,
    pub auth_data: Vec<u8>,
    pub att_stmt:  AttestationStatement,
}

impl MakeCredentialResponse {
    pub fn packed(auth_data: Vec<u8>, sig: Vec<u8>) -> Self {
        Self { fmt: FMT_PACKED.to_string(), auth_data, att_stmt: AttestationStatement::es256(sig) }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, Ctap2Error> {
        encode_value(&Value::Map(vec![
            (iv(1), tv(&self.fmt)),
            (iv(2), Value::Bytes(self.auth_data.clone())),
            (iv(3), self.att_stmt.to_value()),
        ]))
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self, Ctap2Error> {
        let map = parse_cbor(data)?;
        let field = |key: i64, name: &str| {
            cbor_get(&map, key).ok_or_else(|| Ctap2Error::MalformedRequest(format!("{name} missing")))
        };
        Ok(Self {
            fmt: expect_text(field(1, "fmt")?, "fmt")?.to_string(),
            auth_data: expect_bytes(field(2, "authData")?, "authData")?.to_vec(),
            att_stmt: AttestationStatement::from_value(field(3, "attStmt")?)?,
        })
    }
}

/// GetAssertion response: `{1: credential, 2: authData, 3: signature, 4: user}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionResponse {
    pub credential: CredentialDescriptor,
    pub auth_data:  Vec<u8>,
    pub signature:  Vec<u8>,
    pub user:       UserEntity,
}

impl GetAssertionResponse {
    pub fn to_cbor(&self) -> Result<Vec<u8>, Ctap2Error> {
        encode_value(&Value::Map(vec![
            (iv(1), self.credential.to_value()),
            (iv(2), Value::Bytes(self.auth_data.clone())),
            (iv(3), Value::Bytes(self.signature.clone())),
            (iv(4), self.user.to_value()),
        ]))
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self, Ctap2Error> {
        let map = parse_cbor(data)?;
        let field = |key: i64, name: &str| {
            cbor_get(&map, key).ok_or_else(|| Ctap2Error::MalformedRequest(format!("{name} missing")))
        };
        Ok(Self {
            credential: CredentialDescriptor::from_value(field(1, "credential")?)?,
            auth_data: expect_bytes(field(2, "authData")?, "authData")?.to_vec(),
            signature: expect_bytes(field(3, "signature")?, "signature")?.to_vec(),
            user: UserEntity::from_value(field(4, "user")?)?,
        })
    }
}
