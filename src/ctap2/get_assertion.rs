use sha2::{Digest, Sha256};

use super::Authenticator;
use super::attestation::GetAssertionResponse;
use super::authenticator_data::{AuthenticatorData, FLAG_UP, FLAG_UV};
use super::types::{Ctap2Error, CredentialDescriptor, GetAssertionRequest};
use crate::up::CredentialChoice;

pub(crate) async fn handle_get_assertion(auth: &Authenticator, body: &[u8]) -> Result<Vec<u8>, Ctap2Error> {
    let req = GetAssertionRequest::try_from(body)?;

    // Candidates for this RP, newest first
    let rp_id = req.rp_id.clone();
    let candidates: Vec<CredentialChoice> = auth
        .with_store(move |store| Ok(store.list_credentials(&rp_id)))
        .await?
        .into_iter()
        .map(|(id, user)| CredentialChoice { credential_id: id.to_vec(), user })
        .collect();
    if candidates.is_empty() {
        return Err(Ctap2Error::NoCredentials);
    }

    let chosen = if req.allow_list.is_empty() {
        auth.state
            .choose_credential(&req.rp_id, candidates, auth.confirm_timeout)
            .await?
    } else {
        candidates
            .into_iter()
            .find(|c| req.allow_list.iter().any(|d| d.id == c.credential_id))
            .ok_or(Ctap2Error::InvalidCredential)?
    };

    let proof = auth
        .state
        .verify_user(&req.rp_id, Some(chosen.clone()), false, auth.confirm_timeout)
        .await?;
    tracing::info!(rp_id = %req.rp_id, "User verification confirmed");

    let rp_id_hash: [u8; 32] = Sha256::digest(req.rp_id.as_bytes()).into();
    let GetAssertionRequest { rp_id, client_data_hash, .. } = req;
    let cred_id = chosen.credential_id.clone();
    let (auth_data, signature) = auth
        .with_store(move |store| {
            store.sign_with(
                &rp_id,
                &cred_id,
                &client_data_hash,
                |count| {
                    AuthenticatorData {
                        rp_id_hash,
                        flags: FLAG_UP | FLAG_UV,
                        sign_count: count,
                        attested_credential_data: None,
                    }
                    .to_bytes()
                },
                &proof,
            )
        })
        .await?;

    GetAssertionResponse {
        credential: CredentialDescriptor::public_key(&chosen.credential_id),
        auth_data,
        signature,
        user: chosen.user,
    }
    .to_cbor()
}
