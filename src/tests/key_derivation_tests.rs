use crate::errors::ProtocolViolation;
use crate::keys::*;
use crate::*;

fn base_secret() -> SecretKey {
    SecretKey::from_slice(
        &hex::decode("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f").unwrap(),
    )
    .unwrap()
}

fn per_commitment_secret() -> SecretKey {
    SecretKey::from_slice(
        &hex::decode("1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100").unwrap(),
    )
    .unwrap()
}

fn base_point() -> PublicKey {
    PublicKey::from_slice(
        &hex::decode("036d6caac248af96f6afa7f904f550253a0f3ef3f5aa2fe6838a95b216691468e2").unwrap(),
    )
    .unwrap()
}

fn per_commitment_point() -> PublicKey {
    PublicKey::from_slice(
        &hex::decode("025f7117a78150fe2ef97db7cfc83bd57b2e2c0d0dd25eaf467a4a1c2a45ce1486").unwrap(),
    )
    .unwrap()
}

#[test]
fn test_derivation_of_local_public_key() {
    let secp = Secp256k1::new();

    let expected_localpubkey = PublicKey::from_slice(
        &hex::decode("0235f2dbfaa89b57ec7b055afe29849ef7ddfeb1cefdb9ebdc43f5494984db29e5").unwrap(),
    )
    .unwrap();

    let actual_local_pubkey = derive_public_key(&base_point(), &per_commitment_point(), &secp);

    println!("Expected Local Public Key: {}", expected_localpubkey);
    println!("Actual Local Public Key: {}", actual_local_pubkey);

    assert_eq!(actual_local_pubkey, expected_localpubkey, "Local public keys do not match");
}

#[test]
fn test_derivation_of_local_private_key() {
    let secp = Secp256k1::new();

    let expected_localprivkey = SecretKey::from_slice(
        &hex::decode("cbced912d3b21bf196a766651e436aff192362621ce317704ea2f75d87e7be0f").unwrap(),
    )
    .unwrap();

    let actual_local_privkey = derive_private_key(&base_secret(), &per_commitment_point(), &secp);

    assert_eq!(expected_localprivkey, actual_local_privkey, "Local private keys do not match");
    assert_eq!(
        PublicKey::from_secret_key(&secp, &actual_local_privkey),
        derive_public_key(&base_point(), &per_commitment_point(), &secp),
        "private and public derivations should agree"
    );
}

#[test]
fn test_derivation_of_revocation_pubkey() {
    let secp = Secp256k1::new();

    let expected_revocation_pubkey = PublicKey::from_slice(
        &hex::decode("02916e326636d19c33f13e8c0c3a03dd157f332f3e99c317c141dd865eb01f8ff0").unwrap(),
    )
    .unwrap();

    let actual_revocation_pubkey = derive_revocation_public_key(&base_point(), &per_commitment_point(), &secp);

    assert_eq!(
        expected_revocation_pubkey, actual_revocation_pubkey,
        "Revocation public keys do not match"
    );
}

#[test]
fn test_derivation_of_revocation_privkey() {
    let secp = Secp256k1::new();

    let expected_revocation_privkey = SecretKey::from_slice(
        &hex::decode("d09ffff62ddb2297ab000cc85bcb4283fdeb6aa052affbc9dddcf33b61078110").unwrap(),
    )
    .unwrap();

    let actual_revocation_privkey =
        derive_revocation_private_key(&base_secret(), &per_commitment_secret(), &secp);

    println!("Expected Revocation Private Key: {:?}", expected_revocation_privkey);
    println!("Actual Revocation Private Key: {:?}", actual_revocation_privkey);

    assert_eq!(
        expected_revocation_privkey, actual_revocation_privkey,
        "Revocation private keys do not match"
    );
}

fn seed_from_hex(s: &str) -> [u8; 32] {
    let mut seed = [0u8; 32];
    hex::decode_to_slice(s, &mut seed).unwrap();
    seed
}

#[test]
fn test_per_commitment_secret_generation() {
    // BOLT 3 Appendix D generation tests
    let cases = [
        (
            "0000000000000000000000000000000000000000000000000000000000000000",
            281474976710655u64,
            "02a40c85b6f28da08dfdbe0926c53fab2de6d28c10301f8f7c4073d5e42e3148",
        ),
        (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            281474976710655,
            "7cc854b54e3e0dcdb010d7a3fee464a9687be6e8db3be6854c475621e007a5dc",
        ),
        (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            0xaaaaaaaaaaa,
            "56f4008fb007ca9acf0e15b054d5c9fd12ee06cea347914ddbaed70d1c13a528",
        ),
        (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            0x555555555555,
            "9015daaeb06dba4ccc05b91b2f73bd54405f2be9f217fbacd3c5ac2e62327d31",
        ),
        (
            "0101010101010101010101010101010101010101010101010101010101010101",
            1,
            "915c75942a26bb3a433a8ce2cb0427c29ec6c1775cfc78328b57f6ba7bfeaa9c",
        ),
    ];

    for (seed, index, expected) in cases {
        let secret = build_commitment_secret(&seed_from_hex(seed), index);
        assert_eq!(hex::encode(secret), expected, "secret for index {:#x}", index);
    }
}

#[test]
fn test_counterparty_secrets_derive_older_entries() {
    let seed = [0x42u8; 32];
    let mut store = CounterpartyCommitmentSecrets::new();

    for height in 0..20u64 {
        let index = INITIAL_COMMITMENT_NUMBER - height;
        store
            .provide_secret(index, build_commitment_secret(&seed, index))
            .expect("consistent secrets should be accepted");
    }

    assert_eq!(store.min_seen_index(), Some(INITIAL_COMMITMENT_NUMBER - 19));
    for height in 0..20u64 {
        let index = INITIAL_COMMITMENT_NUMBER - height;
        assert_eq!(
            store.get_secret(index),
            Some(build_commitment_secret(&seed, index)),
            "secret at height {} should be recoverable",
            height
        );
    }
    assert_eq!(store.get_secret(INITIAL_COMMITMENT_NUMBER - 20), None);
}

#[test]
fn test_counterparty_secrets_reject_inconsistent_secret() {
    let seed = [0x42u8; 32];
    let mut store = CounterpartyCommitmentSecrets::new();

    store
        .provide_secret(INITIAL_COMMITMENT_NUMBER, build_commitment_secret(&seed, INITIAL_COMMITMENT_NUMBER))
        .unwrap();

    let wrong = build_commitment_secret(&[0x43u8; 32], INITIAL_COMMITMENT_NUMBER - 1);
    let result = store.provide_secret(INITIAL_COMMITMENT_NUMBER - 1, wrong);

    assert!(matches!(result, Err(ProtocolViolation::InconsistentSecret)));
    assert_eq!(store.get_secret(INITIAL_COMMITMENT_NUMBER - 1), None);
}

#[test]
fn test_per_commitment_point_matches_secret() {
    let keys_manager = new_keys_manager([7u8; 32], Network::Regtest);
    let channel_keys = keys_manager.derive_channel_keys(3);

    let index = INITIAL_COMMITMENT_NUMBER - 5;
    let secret = SecretKey::from_slice(&channel_keys.build_commitment_secret(index)).unwrap();
    let point = channel_keys.derive_per_commitment_point(index);

    assert_eq!(point, PublicKey::from_secret_key(&channel_keys.secp_ctx, &secret));
}

#[test]
fn test_channel_keys_are_distinct_per_index() {
    let keys_manager = new_keys_manager([7u8; 32], Network::Regtest);

    let first = keys_manager.derive_channel_keys(0).to_public_keys();
    let second = keys_manager.derive_channel_keys(1).to_public_keys();

    assert_ne!(first.funding_pubkey, second.funding_pubkey);
    assert_ne!(first.payment_basepoint, first.htlc_basepoint);
    assert_eq!(
        keys_manager.node_id(),
        new_keys_manager([7u8; 32], Network::Regtest).node_id(),
        "node id is a pure function of the seed"
    );
}
