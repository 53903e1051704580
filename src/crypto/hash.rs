/// Hashing adapter over `bitcoin::hashes`
use bitcoin::hashes::{hash160, sha256, sha256d, sha512, Hash, HashEngine, Hmac, HmacEngine};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// Double SHA-256 ("hash256" in Bitcoin parlance).
pub fn hash256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// RIPEMD-160 of SHA-256.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    sha512::Hash::hash(data).to_byte_array()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut engine = HmacEngine::<sha256::Hash>::new(key);
    engine.input(data);
    Hmac::<sha256::Hash>::from_engine(engine).to_byte_array()
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut engine = HmacEngine::<sha512::Hash>::new(key);
    engine.input(data);
    Hmac::<sha512::Hash>::from_engine(engine).to_byte_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash160_known_pubkey() {
        // hash160 of the generator-point compressed pubkey.
        let pubkey =
            hex::decode("0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798")
                .unwrap();
        assert_eq!(
            hex::encode(hash160(&pubkey)),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_hmac_sha512_rfc4231_case1() {
        let key = [0x0bu8; 20];
        let mac = hmac_sha512(&key, b"Hi There");
        assert_eq!(
            hex::encode(&mac[..32]),
            "87aa7cdea5ef619d4ff0b4241a1d6cb02379f4e2ce4ec2787ad0b30545e17cde"
        );
    }
}
