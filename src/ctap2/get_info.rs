use ciborium::value::Value;

use super::Authenticator;
use super::types::{Ctap2Error, encode_value, iv, tv};

pub const VERSION_FIDO_2_0: &str = "FIDO_2_0";
pub const MAX_MSG_SIZE: i64 = 1200;

/// CBOR body of the GetInfo response.
pub(crate) async fn handle_get_info(auth: &Authenticator, _body: &[u8]) -> Result<Vec<u8>, Ctap2Error> {
    let map = Value::Map(vec![
        (iv(1), Value::Array(vec![tv(VERSION_FIDO_2_0)])),
        (iv(2), Value::Array(vec![])),
        (iv(3), Value::Bytes(auth.aaguid.to_vec())),
        (
            iv(4),
            Value::Map(vec![
                (tv("rk"), Value::Bool(true)),
                (tv("up"), Value::Bool(true)),
                (tv("uv"), Value::Bool(true)),
                (tv("plat"), Value::Bool(false)),
            ]),
        ),
        (iv(5), iv(MAX_MSG_SIZE)),
    ]);
    encode_value(&map)
}
