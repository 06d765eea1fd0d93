pub mod commitment;
pub mod derivation;
pub mod secrets;
pub mod sign;

pub use commitment::{
    derive_private_key, derive_public_key, derive_revocation_private_key,
    derive_revocation_public_key,
};
pub use derivation::new_keys_manager;
pub use secrets::{build_commitment_secret, CounterpartyCommitmentSecrets};
pub use sign::*;
