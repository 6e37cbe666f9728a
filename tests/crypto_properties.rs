//! Property tests for slot encryption

use clipslot::crypto::{self, CryptoError, KdfParams};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn seal_then_open_returns_plaintext(
        plaintext in proptest::collection::vec(any::<u8>(), 0..4096),
        passphrase in "[ -~]{1,32}",
    ) {
        let sealed = crypto::seal(&plaintext, &passphrase, KdfParams::light()).unwrap();
        prop_assert_ne!(&sealed.ciphertext, &plaintext);
        prop_assert_eq!(crypto::open(&sealed, &passphrase).unwrap(), plaintext);
    }

    #[test]
    fn flipped_ciphertext_bit_is_rejected(
        plaintext in proptest::collection::vec(any::<u8>(), 1..1024),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut sealed = crypto::seal(&plaintext, "passphrase", KdfParams::light()).unwrap();
        let i = index.index(sealed.ciphertext.len());
        sealed.ciphertext[i] ^= 1 << bit;

        prop_assert!(matches!(
            crypto::open(&sealed, "passphrase"),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn flipped_nonce_bit_is_rejected(
        index in 0usize..crypto::NONCE_SIZE,
        bit in 0u8..8,
    ) {
        let mut sealed = crypto::seal(b"secret-data", "passphrase", KdfParams::light()).unwrap();
        sealed.nonce[index] ^= 1 << bit;

        prop_assert!(crypto::open(&sealed, "passphrase").is_err());
    }

    #[test]
    fn wrong_passphrase_is_rejected(
        right in "[a-z]{8,16}",
        wrong in "[A-Z]{8,16}",
    ) {
        let sealed = crypto::seal(b"secret-data", &right, KdfParams::light()).unwrap();
        prop_assert!(matches!(
            crypto::open(&sealed, &wrong),
            Err(CryptoError::Authentication)
        ));
    }
}

#[test]
fn compressed_payload_survives_round_trip() {
    let plaintext = "kubeconfig line\n".repeat(20_000).into_bytes();
    let sealed = crypto::seal(&plaintext, "passphrase", KdfParams::light()).unwrap();

    assert!(sealed.compressed);
    assert!(sealed.ciphertext.len() < plaintext.len());
    assert_eq!(crypto::open(&sealed, "passphrase").unwrap(), plaintext);
}
