use rand::Rng;
use sha2::{Digest, Sha256};

use super::Authenticator;
use super::attestation::MakeCredentialResponse;
use super::authenticator_data::{AttestedCredentialData, AuthenticatorData, FLAG_AT, FLAG_UP, FLAG_UV};
use super::types::{Ctap2Error, MakeCredentialRequest};
use crate::store::CredentialId;
use crate::up::CredentialChoice;

pub(crate) async fn handle_make_credential(auth: &Authenticator, body: &[u8]) -> Result<Vec<u8>, Ctap2Error> {
    let req = MakeCredentialRequest::try_from(body)?;

    // 1. Algorithm
    if !req.supports_es256() {
        return Err(Ctap2Error::UnsupportedAlgorithm);
    }

    // 2. excludeList
    let rp_id = req.rp.id.clone();
    let excluded: Vec<Vec<u8>> = req.exclude_list.iter().map(|d| d.id.clone()).collect();
    let is_excluded = auth
        .with_store(move |store| Ok(excluded.iter().any(|id| store.exists(&rp_id, id))))
        .await?;
    if is_excluded {
        tracing::info!(rp_id = %req.rp.id, "Credential excluded");
        return Err(Ctap2Error::CredentialExcluded);
    }

    // 3. User verification
    let cred_id: CredentialId = rand::thread_rng().r#gen();
    let pending = CredentialChoice { credential_id: cred_id.to_vec(), user: req.user.clone() };
    let proof = auth
        .state
        .verify_user(&req.rp.id, Some(pending), true, auth.confirm_timeout)
        .await?;
    tracing::info!(rp_id = %req.rp.id, "User verification confirmed");

    // 4. Key generation, attestation signature
    let rp_id_hash: [u8; 32] = Sha256::digest(req.rp.id.as_bytes()).into();
    let aaguid = auth.aaguid;
    let MakeCredentialRequest { client_data_hash, rp, user, .. } = req;
    let (auth_data, sig) = auth
        .with_store(move |store| {
            let (public_key, replaced) = store.create_credential_with_id(&rp.id, cred_id, user, &proof)?;
            let attested = AttestedCredentialData {
                aaguid,
                credential_id: cred_id.to_vec(),
                public_key,
            };
            let signed = store.sign_with(
                &rp.id,
                &cred_id,
                &client_data_hash,
                |count| {
                    AuthenticatorData {
                        rp_id_hash,
                        flags: FLAG_UP | FLAG_UV | FLAG_AT,
                        sign_count: count,
                        attested_credential_data: Some(attested),
                    }
                    .to_bytes()
                },
                &proof,
            );
            match signed {
                Ok(signed) => {
                    store.supersede(&cred_id, &replaced)?;
                    Ok(signed)
                }
                Err(e) => {
                    // no attestation, no credential; earlier ones stay
                    if let Err(cleanup) = store.remove(&cred_id) {
                        tracing::warn!(error = %cleanup, "Failed to discard unattested credential");
                    }
                    Err(e)
                }
            }
        })
        .await?;

    MakeCredentialResponse::packed(auth_data, sig).to_cbor()
}
