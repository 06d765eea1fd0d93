use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::keys::secrets::build_commitment_secret;
use crate::types::{ChannelKeyManager, ChannelPublicKeys, CommitmentKeys};

// ============================================================================
// PER-COMMITMENT KEY DERIVATION
// ============================================================================

/// pubkey = basepoint + SHA256(per_commitment_point || basepoint) * G
pub fn derive_public_key(
    basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> PublicKey {
    let mut engine = Sha256::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let res = Sha256::from_engine(engine);

    let hashkey = PublicKey::from_secret_key(
        secp_ctx,
        &SecretKey::from_slice(res.as_byte_array())
            .expect("Hashes should always be valid keys unless SHA-256 is broken"),
    );

    basepoint.combine(&hashkey).expect("Addition only fails if the tweak is the inverse of the key. This is not possible when the tweak contains the hash of the key.")
}

/// privkey = basepoint_secret + SHA256(per_commitment_point || basepoint)
pub fn derive_private_key(
    basepoint_secret: &SecretKey,
    per_commitment_point: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> SecretKey {
    let basepoint = PublicKey::from_secret_key(secp_ctx, basepoint_secret);

    let mut engine = Sha256::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let res = Sha256::from_engine(engine).to_byte_array();

    basepoint_secret
        .add_tweak(&Scalar::from_be_bytes(res).expect("SHA-256 output below curve order"))
        .expect("Addition only fails if the tweak is the inverse of the key. This is not possible when the tweak contains the hash of the key.")
}

// revocationpubkey = revocation_basepoint * SHA256(revocation_basepoint || per_commitment_point)
//                  + per_commitment_point * SHA256(per_commitment_point || revocation_basepoint)
pub fn derive_revocation_public_key(
    revocation_basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> PublicKey {
    let (scalar1, scalar2) = revocation_tweaks(revocation_basepoint, per_commitment_point);

    let component1 = revocation_basepoint
        .mul_tweak(secp_ctx, &scalar1)
        .expect("Valid tweak");
    let component2 = per_commitment_point
        .mul_tweak(secp_ctx, &scalar2)
        .expect("Valid tweak");

    component1.combine(&component2).expect("Valid combination")
}

pub fn derive_revocation_private_key(
    revocation_basepoint_secret: &SecretKey,
    per_commitment_secret: &SecretKey,
    secp_ctx: &Secp256k1<All>,
) -> SecretKey {
    let revocation_basepoint = PublicKey::from_secret_key(secp_ctx, revocation_basepoint_secret);
    let per_commitment_point = PublicKey::from_secret_key(secp_ctx, per_commitment_secret);
    let (scalar1, scalar2) = revocation_tweaks(&revocation_basepoint, &per_commitment_point);

    let key1 = revocation_basepoint_secret
        .mul_tweak(&scalar1)
        .expect("Valid tweak");
    let key2 = per_commitment_secret
        .mul_tweak(&scalar2)
        .expect("Valid tweak");

    let scalar_key2 = Scalar::from_be_bytes(key2.secret_bytes()).expect("Valid scalar");
    key1.add_tweak(&scalar_key2).expect("Valid addition")
}

fn revocation_tweaks(revocation_basepoint: &PublicKey, per_commitment_point: &PublicKey) -> (Scalar, Scalar) {
    let mut engine1 = Sha256::engine();
    engine1.input(&revocation_basepoint.serialize());
    engine1.input(&per_commitment_point.serialize());
    let hash1 = Sha256::from_engine(engine1).to_byte_array();

    let mut engine2 = Sha256::engine();
    engine2.input(&per_commitment_point.serialize());
    engine2.input(&revocation_basepoint.serialize());
    let hash2 = Sha256::from_engine(engine2).to_byte_array();

    (
        Scalar::from_be_bytes(hash1).expect("Valid scalar"),
        Scalar::from_be_bytes(hash2).expect("Valid scalar"),
    )
}

// ============================================================================
// COMMITMENT KEYS
// ============================================================================

impl CommitmentKeys {
    /// Keys for the commitment broadcast by the owner of `per_commitment_point`.
    /// "local" here means the broadcaster, "remote" its countersignatory.
    pub fn from_basepoints(
        per_commitment_point: &PublicKey,
        local_delayed_payment_basepoint: &PublicKey,
        local_htlc_basepoint: &PublicKey,
        remote_revocation_basepoint: &PublicKey,
        remote_htlc_basepoint: &PublicKey,
        secp_ctx: &Secp256k1<All>,
    ) -> Self {
        let revocation_key = derive_revocation_public_key(
            remote_revocation_basepoint,
            per_commitment_point,
            secp_ctx,
        );
        let local_delayed_payment_key = derive_public_key(
            local_delayed_payment_basepoint,
            per_commitment_point,
            secp_ctx,
        );
        let local_htlc_key = derive_public_key(local_htlc_basepoint, per_commitment_point, secp_ctx);
        let remote_htlc_key = derive_public_key(remote_htlc_basepoint, per_commitment_point, secp_ctx);

        Self {
            per_commitment_point: *per_commitment_point,
            revocation_key,
            local_htlc_key,
            remote_htlc_key,
            local_delayed_payment_key,
        }
    }

    /// Shorthand for a commitment broadcast by `broadcaster` and
    /// countersigned by `countersignatory`.
    pub fn for_broadcaster(
        per_commitment_point: &PublicKey,
        broadcaster: &ChannelPublicKeys,
        countersignatory: &ChannelPublicKeys,
        secp_ctx: &Secp256k1<All>,
    ) -> Self {
        Self::from_basepoints(
            per_commitment_point,
            &broadcaster.delayed_payment_basepoint,
            &broadcaster.htlc_basepoint,
            &countersignatory.revocation_basepoint,
            &countersignatory.htlc_basepoint,
            secp_ctx,
        )
    }
}

// ============================================================================
// CHANNEL KEY MANAGER
// ============================================================================

impl ChannelKeyManager {
    pub fn to_public_keys(&self) -> ChannelPublicKeys {
        ChannelPublicKeys {
            funding_pubkey: PublicKey::from_secret_key(&self.secp_ctx, &self.funding_key),
            revocation_basepoint: PublicKey::from_secret_key(
                &self.secp_ctx,
                &self.revocation_basepoint_secret,
            ),
            payment_basepoint: PublicKey::from_secret_key(
                &self.secp_ctx,
                &self.payment_basepoint_secret,
            ),
            delayed_payment_basepoint: PublicKey::from_secret_key(
                &self.secp_ctx,
                &self.delayed_payment_basepoint_secret,
            ),
            htlc_basepoint: PublicKey::from_secret_key(&self.secp_ctx, &self.htlc_basepoint_secret),
        }
    }

    /// Per-commitment secret for BOLT 3 index `commitment_number`.
    pub fn build_commitment_secret(&self, commitment_number: u64) -> [u8; 32] {
        build_commitment_secret(&self.commitment_seed, commitment_number)
    }

    pub fn derive_per_commitment_point(&self, commitment_number: u64) -> PublicKey {
        let secret = self.build_commitment_secret(commitment_number);
        let secret_key = SecretKey::from_slice(&secret).expect("Valid secret");
        PublicKey::from_secret_key(&self.secp_ctx, &secret_key)
    }

    /// Our HTLC private key for a commitment built on `per_commitment_point`.
    pub fn htlc_key_for(&self, per_commitment_point: &PublicKey) -> SecretKey {
        derive_private_key(&self.htlc_basepoint_secret, per_commitment_point, &self.secp_ctx)
    }
}
