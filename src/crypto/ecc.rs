/// secp256k1 adapter
///
/// Key material crosses this boundary as raw byte buffers; callers never
/// handle `secp256k1` types directly.
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Scalar, SecretKey, SECP256K1};

use crate::crypto::SecretBytes;
use crate::error::{CryptoError, CryptoResult};

fn secret_from_slice(bytes: &[u8]) -> CryptoResult<SecretKey> {
    SecretKey::from_slice(bytes).map_err(|_| CryptoError::BadLength {
        expected: 32,
        got: bytes.len(),
    })
}

fn point_from_slice(bytes: &[u8]) -> CryptoResult<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPoint)
}

fn scalar_from_slice(bytes: &[u8]) -> CryptoResult<Scalar> {
    let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::BadLength {
        expected: 32,
        got: bytes.len(),
    })?;
    Scalar::from_be_bytes(arr).map_err(|_| CryptoError::InvalidPoint)
}

/// Uncompressed (65-byte) public key for a private scalar.
pub fn pubkey_from_priv(privkey: &[u8]) -> CryptoResult<Vec<u8>> {
    let sk = secret_from_slice(privkey)?;
    let pk = PublicKey::from_secret_key(SECP256K1, &sk);
    Ok(pk.serialize_uncompressed().to_vec())
}

/// Compressed (33-byte) public key for a private scalar.
pub fn compressed_pubkey_from_priv(privkey: &[u8]) -> CryptoResult<Vec<u8>> {
    let sk = secret_from_slice(privkey)?;
    let pk = PublicKey::from_secret_key(SECP256K1, &sk);
    Ok(pk.serialize().to_vec())
}

/// Re-serialize a point in compressed form.
pub fn compress_point(pubkey: &[u8]) -> CryptoResult<Vec<u8>> {
    Ok(point_from_slice(pubkey)?.serialize().to_vec())
}

/// Re-serialize a point in uncompressed form.
pub fn uncompress_point(pubkey: &[u8]) -> CryptoResult<Vec<u8>> {
    Ok(point_from_slice(pubkey)?.serialize_uncompressed().to_vec())
}

/// `priv * scalar mod n`.
pub fn priv_tweak_mul(privkey: &[u8], scalar: &[u8]) -> CryptoResult<SecretBytes> {
    let sk = secret_from_slice(privkey)?;
    let tweak = scalar_from_slice(scalar)?;
    let out = sk.mul_tweak(&tweak).map_err(|_| CryptoError::InvalidPoint)?;
    Ok(SecretBytes::from(out.secret_bytes().to_vec()))
}

/// `(priv + scalar) mod n`. Fails when the sum is zero.
pub fn priv_tweak_add(privkey: &[u8], scalar: &[u8]) -> CryptoResult<SecretBytes> {
    let sk = secret_from_slice(privkey)?;
    let tweak = scalar_from_slice(scalar)?;
    let out = sk.add_tweak(&tweak).map_err(|_| CryptoError::InvalidPoint)?;
    Ok(SecretBytes::from(out.secret_bytes().to_vec()))
}

/// `point * scalar`, returned in the same compression as the input.
pub fn point_tweak_mul(pubkey: &[u8], scalar: &[u8]) -> CryptoResult<Vec<u8>> {
    let pk = point_from_slice(pubkey)?;
    let tweak = scalar_from_slice(scalar)?;
    let out = pk
        .mul_tweak(SECP256K1, &tweak)
        .map_err(|_| CryptoError::InvalidPoint)?;
    if pubkey.len() == 33 {
        Ok(out.serialize().to_vec())
    } else {
        Ok(out.serialize_uncompressed().to_vec())
    }
}

/// `point + scalar*G`, the soft-derivation step. Fails on the point at
/// infinity.
pub fn point_add_scalar(pubkey: &[u8], scalar: &[u8]) -> CryptoResult<Vec<u8>> {
    let pk = point_from_slice(pubkey)?;
    let tweak = scalar_from_slice(scalar)?;
    let out = pk
        .add_exp_tweak(SECP256K1, &tweak)
        .map_err(|_| CryptoError::InvalidPoint)?;
    if pubkey.len() == 33 {
        Ok(out.serialize().to_vec())
    } else {
        Ok(out.serialize_uncompressed().to_vec())
    }
}

/// Deterministic (RFC 6979) low-S ECDSA signature, DER-encoded.
pub fn sign_deterministic(privkey: &[u8], msg_hash: &[u8]) -> CryptoResult<Vec<u8>> {
    let sk = secret_from_slice(privkey)?;
    let msg = Message::from_digest_slice(msg_hash).map_err(|_| CryptoError::BadLength {
        expected: 32,
        got: msg_hash.len(),
    })?;
    let sig = SECP256K1.sign_ecdsa(&msg, &sk);
    Ok(sig.serialize_der().to_vec())
}

/// Verify a DER-encoded ECDSA signature. The signature is normalized to
/// low-S form before verification.
pub fn verify(pubkey: &[u8], msg_hash: &[u8], sig_der: &[u8]) -> CryptoResult<bool> {
    let pk = point_from_slice(pubkey)?;
    let msg = Message::from_digest_slice(msg_hash).map_err(|_| CryptoError::BadLength {
        expected: 32,
        got: msg_hash.len(),
    })?;
    let mut sig = Signature::from_der(sig_der).map_err(|_| CryptoError::InvalidSignature)?;
    sig.normalize_s();
    Ok(SECP256K1.verify_ecdsa(&msg, &sig, &pk).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: [u8; 32] = {
        let mut b = [0u8; 32];
        b[31] = 1;
        b
    };

    #[test]
    fn test_generator_pubkey() {
        let pubkey = compressed_pubkey_from_priv(&ONE).unwrap();
        assert_eq!(
            hex::encode(&pubkey),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn test_compress_round_trip() {
        let uncompressed = pubkey_from_priv(&ONE).unwrap();
        assert_eq!(uncompressed.len(), 65);
        let compressed = compress_point(&uncompressed).unwrap();
        assert_eq!(compressed.len(), 33);
        assert_eq!(uncompress_point(&compressed).unwrap(), uncompressed);
    }

    #[test]
    fn test_tweak_mul_matches_on_both_sides() {
        let privkey = crate::crypto::random::generate_private_key_bytes().unwrap();
        let scalar = crate::crypto::random::generate_private_key_bytes().unwrap();

        let tweaked_priv = priv_tweak_mul(&privkey, &scalar).unwrap();
        let pub_of_tweaked = pubkey_from_priv(tweaked_priv.as_slice()).unwrap();

        let pubkey = pubkey_from_priv(&privkey).unwrap();
        let tweaked_pub = point_tweak_mul(&pubkey, &scalar).unwrap();

        assert_eq!(pub_of_tweaked, tweaked_pub);
    }

    #[test]
    fn test_sign_and_verify() {
        let privkey = crate::crypto::random::generate_private_key_bytes().unwrap();
        let pubkey = compressed_pubkey_from_priv(&privkey).unwrap();
        let digest = crate::crypto::hash::sha256(b"message");

        let sig = sign_deterministic(&privkey, &digest).unwrap();
        assert!(verify(&pubkey, &digest, &sig).unwrap());

        let other = crate::crypto::hash::sha256(b"other");
        assert!(!verify(&pubkey, &other, &sig).unwrap());
    }

    #[test]
    fn test_invalid_point_rejected() {
        let garbage = [0xFFu8; 33];
        assert!(matches!(
            compress_point(&garbage),
            Err(CryptoError::InvalidPoint)
        ));
    }
}
