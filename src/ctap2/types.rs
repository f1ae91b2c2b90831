use ciborium::value::Value;
use serde::{Deserialize, Serialize};

pub const CTAP2_CMD_MAKE_CREDENTIAL: u8 = 0x01;
pub const CTAP2_CMD_GET_ASSERTION:   u8 = 0x02;
pub const CTAP2_CMD_GET_INFO:        u8 = 0x04;

pub const CTAP2_OK: u8 = 0x00;

pub const COSE_ALG_ES256: i64 = -7;
pub const CREDENTIAL_TYPE_PUBLIC_KEY: &str = "public-key";

#[derive(Debug, thiserror::Error)]
pub enum Ctap2Error {
    #[error("invalid command")]         InvalidCommand,
    #[error("invalid parameter")]       InvalidParameter,
    #[error("malformed request: {0}")]  MalformedRequest(String),
    #[error("unsupported algorithm")]   UnsupportedAlgorithm,
    #[error("credential excluded")]     CredentialExcluded,
    #[error("invalid credential")]      InvalidCredential,
    #[error("user action pending")]     UserActionPending,
    #[error("operation denied")]        OperationDenied,
    #[error("user action timeout")]     UserActionTimeout,
    #[error("no credentials")]          NoCredentials,
    #[error("cbor: {0}")]               Cbor(String),
    #[error("store: {0}")]              Store(#[from] crate::store::StoreError),
    #[error("internal: {0}")]           Internal(String),
}

impl Ctap2Error {
    pub fn status_byte(&self) -> u8 {
        use crate::store::StoreError;
        match self {
            Self::InvalidCommand       => 0x01,
            Self::InvalidParameter
            | Self::MalformedRequest(_) => 0x02,
            Self::CredentialExcluded   => 0x19,
            Self::InvalidCredential    => 0x22,
            Self::UserActionPending    => 0x23,
            Self::UnsupportedAlgorithm => 0x26,
            Self::OperationDenied      => 0x27,
            Self::NoCredentials        => 0x2E,
            Self::UserActionTimeout    => 0x2F,
            Self::Store(StoreError::KeyGenerationFailed(_) | StoreError::SigningFailed(_)) => 0x27,
            Self::Store(StoreError::UnknownCredential) => 0x22,
            Self::Cbor(_) | Self::Store(_) | Self::Internal(_) => 0x7F,
        }
    }
}

fn malformed(msg: impl Into<String>) -> Ctap2Error {
    Ctap2Error::MalformedRequest(msg.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id:   String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntity {
    pub id:           Vec<u8>,
    pub name:         Option<String>,
    pub display_name: Option<String>,
}

impl UserEntity {
    /// Best label for prompts: displayName, then name, then "(unknown)".
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("(unknown)")
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut map = vec![(tv("id"), Value::Bytes(self.id.clone()))];
        if let Some(name) = &self.name {
            map.push((tv("name"), tv(name)));
        }
        if let Some(display) = &self.display_name {
            map.push((tv("displayName"), tv(display)));
        }
        Value::Map(map)
    }

    pub(crate) fn from_value(v: &Value) -> Result<Self, Ctap2Error> {
        let m = expect_map(v, "user")?;
        let id = expect_bytes(
            cbor_get_str(m, "id").ok_or_else(|| malformed("user.id missing"))?,
            "user.id",
        )?
        .to_vec();
        let name = optional_text(m, "name")?;
        let display_name = optional_text(m, "displayName")?;
        Ok(Self { id, name, display_name })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialParameters {
    pub cred_type: String,
    pub alg:       i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub cred_type: String,
    pub id:        Vec<u8>,
}

impl CredentialDescriptor {
    pub fn public_key(id: &[u8]) -> Self {
        Self { cred_type: CREDENTIAL_TYPE_PUBLIC_KEY.to_string(), id: id.to_vec() }
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Map(vec![
            (tv("type"), tv(&self.cred_type)),
            (tv("id"), Value::Bytes(self.id.clone())),
        ])
    }

    pub(crate) fn from_value(v: &Value) -> Result<Self, Ctap2Error> {
        let m = expect_map(v, "credential descriptor")?;
        let cred_type = expect_text(
            cbor_get_str(m, "type").ok_or_else(|| malformed("descriptor.type missing"))?,
            "descriptor.type",
        )?
        .to_string();
        let id = expect_bytes(
            cbor_get_str(m, "id").ok_or_else(|| malformed("descriptor.id missing"))?,
            "descriptor.id",
        )?
        .to_vec();
        Ok(Self { cred_type, id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCredentialRequest {
    pub client_data_hash:    Vec<u8>,
    pub rp:                  RelyingParty,
    pub user:                UserEntity,
    pub pub_key_cred_params: Vec<CredentialParameters>,
    pub exclude_list:        Vec<CredentialDescriptor>,
}

impl MakeCredentialRequest {
    /// True if `{type: "public-key", alg: ES256}` is offered.
    pub fn supports_es256(&self) -> bool {
        self.pub_key_cred_params
            .iter()
            .any(|p| p.cred_type == CREDENTIAL_TYPE_PUBLIC_KEY && p.alg == COSE_ALG_ES256)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, Ctap2Error> {
        let mut rp = vec![(tv("id"), tv(&self.rp.id))];
        if let Some(name) = &self.rp.name {
            rp.push((tv("name"), tv(name)));
        }
        let params = self
            .pub_key_cred_params
            .iter()
            .map(|p| Value::Map(vec![(tv("type"), tv(&p.cred_type)), (tv("alg"), iv(p.alg))]))
            .collect();
        let mut map = vec![
            (iv(1), Value::Bytes(self.client_data_hash.clone())),
            (iv(2), Value::Map(rp)),
            (iv(3), self.user.to_value()),
            (iv(4), Value::Array(params)),
        ];
        if !self.exclude_list.is_empty() {
            map.push((
                iv(5),
                Value::Array(self.exclude_list.iter().map(CredentialDescriptor::to_value).collect()),
            ));
        }
        encode_value(&Value::Map(map))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionRequest {
    pub rp_id:            String,
    pub client_data_hash: Vec<u8>,
    pub allow_list:       Vec<CredentialDescriptor>,
}

impl GetAssertionRequest {
    pub fn to_cbor(&self) -> Result<Vec<u8>, Ctap2Error> {
        let mut map = vec![
            (iv(1), tv(&self.rp_id)),
            (iv(2), Value::Bytes(self.client_data_hash.clone())),
        ];
        if !self.allow_list.is_empty() {
            map.push((
                iv(3),
                Value::Array(self.allow_list.iter().map(CredentialDescriptor::to_value).collect()),
            ));
        }
        encode_value(&Value::Map(map))
    }
}

// CBOR helpers

pub(crate) fn iv(i: i64) -> Value { Value::Integer(i.into()) }
pub(crate) fn tv(s: &str) -> Value { Value::Text(s.to_string()) }

pub(crate) fn encode_value(value: &Value) -> Result<Vec<u8>, Ctap2Error> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Ctap2Error::Cbor(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn parse_cbor(data: &[u8]) -> Result<Vec<(Value, Value)>, Ctap2Error> {
    let value: Value = ciborium::from_reader(data)
        .map_err(|e| malformed(format!("invalid cbor: {e}")))?;
    match value {
        Value::Map(map) => Ok(map),
        _ => Err(malformed("expected map")),
    }
}

/// Look up an integer-keyed field. The decimal text form of the key is
/// accepted too, since some platforms label CTAP fields `"1".."5"`.
pub(crate) fn cbor_get(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| match k {
            Value::Integer(i) => i128::from(*i) == key as i128,
            Value::Text(s) => *s == key.to_string(),
            _ => false,
        })
        .map(|(_, v)| v)
}

pub(crate) fn cbor_get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

pub(crate) fn cbor_int(v: &Value) -> Option<i64> {
    match v { Value::Integer(i) => i64::try_from(*i).ok(), _ => None }
}

fn required<'a>(map: &'a [(Value, Value)], key: i64, name: &str) -> Result<&'a Value, Ctap2Error> {
    cbor_get(map, key).ok_or_else(|| malformed(format!("{name} missing")))
}

pub(crate) fn expect_bytes<'a>(v: &'a Value, name: &str) -> Result<&'a [u8], Ctap2Error> {
    match v { Value::Bytes(b) => Ok(b), _ => Err(malformed(format!("{name}: expected bytes"))) }
}

pub(crate) fn expect_text<'a>(v: &'a Value, name: &str) -> Result<&'a str, Ctap2Error> {
    match v { Value::Text(s) => Ok(s), _ => Err(malformed(format!("{name}: expected text"))) }
}

pub(crate) fn expect_map<'a>(v: &'a Value, name: &str) -> Result<&'a [(Value, Value)], Ctap2Error> {
    match v { Value::Map(m) => Ok(m), _ => Err(malformed(format!("{name}: expected map"))) }
}

pub(crate) fn expect_array<'a>(v: &'a Value, name: &str) -> Result<&'a [Value], Ctap2Error> {
    match v { Value::Array(a) => Ok(a), _ => Err(malformed(format!("{name}: expected array"))) }
}

fn optional_text(map: &[(Value, Value)], key: &str) -> Result<Option<String>, Ctap2Error> {
    cbor_get_str(map, key)
        .map(|v| expect_text(v, key).map(str::to_string))
        .transpose()
}

fn descriptor_list(map: &[(Value, Value)], key: i64, name: &str) -> Result<Vec<CredentialDescriptor>, Ctap2Error> {
    match cbor_get(map, key) {
        Some(v) => expect_array(v, name)?
            .iter()
            .map(CredentialDescriptor::from_value)
            .collect(),
        None => Ok(vec![]),
    }
}

impl TryFrom<&[u8]> for MakeCredentialRequest {
    type Error = Ctap2Error;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let map = parse_cbor(data)?;

        // 1: clientDataHash
        let client_data_hash =
            expect_bytes(required(&map, 1, "clientDataHash")?, "clientDataHash")?.to_vec();

        // 2: rp
        let rp_map = expect_map(required(&map, 2, "rp")?, "rp")?;
        let rp_id = expect_text(
            cbor_get_str(rp_map, "id").ok_or_else(|| malformed("rp.id missing"))?,
            "rp.id",
        )?
        .to_string();
        if rp_id.is_empty() {
            return Err(malformed("rp.id is empty"));
        }
        let rp = RelyingParty { id: rp_id, name: optional_text(rp_map, "name")? };

        // 3: user
        let user = UserEntity::from_value(required(&map, 3, "user")?)?;

        // 4: pubKeyCredParams
        let pub_key_cred_params = expect_array(required(&map, 4, "pubKeyCredParams")?, "pubKeyCredParams")?
            .iter()
            .map(|item| {
                let m = expect_map(item, "pubKeyCredParams entry")?;
                let cred_type = expect_text(
                    cbor_get_str(m, "type").ok_or_else(|| malformed("param.type missing"))?,
                    "param.type",
                )?
                .to_string();
                let alg = cbor_get_str(m, "alg")
                    .and_then(cbor_int)
                    .ok_or_else(|| malformed("param.alg missing or not an integer"))?;
                Ok(CredentialParameters { cred_type, alg })
            })
            .collect::<Result<Vec<_>, Ctap2Error>>()?;

        // 5: excludeList
        let exclude_list = descriptor_list(&map, 5, "excludeList")?;

        Ok(MakeCredentialRequest { client_data_hash, rp, user, pub_key_cred_params, exclude_list })
    }
}

impl TryFrom<&[u8]> for GetAssertionRequest {
    type Error = Ctap2Error;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let map = parse_cbor(data)?;

        // 1: rpId
        let rp_id = expect_text(required(&map, 1, "rpId")?, "rpId")?.to_string();
        if rp_id.is_empty() {
            return Err(malformed("rpId is empty"));
        }

        // 2: clientDataHash
        let client_data_hash =
            expect_bytes(required(&map, 2, "clientDataHash")?, "clientDataHash")?.to_vec();

        // 3: allowList (optional)
        let allow_list = descriptor_list(&map, 3, "allowList")?;

        Ok(GetAssertionRequest { rp_id, client_data_hash, allow_list })
    }
}
