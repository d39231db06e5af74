/// Hash-algorithm capability for the pool's share-validation pipeline
///
/// Every algorithm is an immutable, constructed-once value object: any key or
/// customization material is fixed at construction and never mutated, so
/// instances are shared across connection tasks without locking.
///
/// Algorithms that only exist as native libraries (NeoScrypt, Yespower,
/// Lyra2Rev3) plug in behind the same traits from outside this crate; the FFI
/// boundary is not part of this workspace.

use blake2::digest::consts::U32;
use blake2::digest::{Digest, KeyInit, Mac};
use sha2::Sha256;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{CShake128Core, CShake256Core};

type Blake2b256 = blake2::Blake2b<U32>;
type Blake2bMac256 = blake2::Blake2bMac<U32>;

/// Opaque 256-bit digest function.
pub trait HashAlgorithm: Send + Sync {
    fn digest(&self, data: &[u8]) -> [u8; 32];
}

impl<T: HashAlgorithm + ?Sized> HashAlgorithm for std::sync::Arc<T> {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        (**self).digest(data)
    }
}

impl<T: HashAlgorithm + ?Sized> HashAlgorithm for Box<T> {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        (**self).digest(data)
    }
}

/// Double SHA-256 (Bitcoin-family header hash).
#[derive(Debug, Default, Clone)]
pub struct Sha256d;

impl HashAlgorithm for Sha256d {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        second.into()
    }
}

/// BLAKE2b-256, optionally keyed (Kaspa block-header hashing uses the
/// "BlockHash" key).
#[derive(Debug, Clone)]
pub struct Blake2b {
    key: Option<Vec<u8>>,
}

impl Blake2b {
    pub fn new() -> Self {
        Self { key: None }
    }

    /// Keys longer than 64 bytes are not valid BLAKE2b keys.
    pub fn keyed(key: &[u8]) -> Self {
        assert!(!key.is_empty() && key.len() <= 64, "invalid blake2b key length");
        Self { key: Some(key.to_vec()) }
    }
}

impl Default for Blake2b {
    fn default() -> Self {
        Self::new()
    }
}

impl HashAlgorithm for Blake2b {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        match &self.key {
            None => {
                let mut hasher = Blake2b256::new();
                Digest::update(&mut hasher, data);
                out.copy_from_slice(&hasher.finalize());
            }
            Some(key) => {
                // Length validated at construction.
                let mut hasher = <Blake2bMac256 as KeyInit>::new_from_slice(key)
                    .expect("key length checked in keyed()");
                Mac::update(&mut hasher, data);
                out.copy_from_slice(&hasher.finalize().into_bytes());
            }
        }
        out
    }
}

/// BLAKE3, optionally keyed with a 32-byte key (Pyrin-style chains derive the
/// key by zero-padding a domain string).
#[derive(Debug, Clone)]
pub struct Blake3 {
    key: Option<[u8; 32]>,
}

impl Blake3 {
    pub fn new() -> Self {
        Self { key: None }
    }

    pub fn keyed(key: [u8; 32]) -> Self {
        Self { key: Some(key) }
    }

    /// Zero-pads (or truncates) a domain string into a 32-byte key.
    pub fn keyed_from_domain(domain: &[u8]) -> Self {
        let mut key = [0u8; 32];
        let n = domain.len().min(32);
        key[..n].copy_from_slice(&domain[..n]);
        Self::keyed(key)
    }
}

impl Default for Blake3 {
    fn default() -> Self {
        Self::new()
    }
}

impl HashAlgorithm for Blake3 {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        match &self.key {
            None => *blake3::hash(data).as_bytes(),
            Some(key) => *blake3::keyed_hash(key, data).as_bytes(),
        }
    }
}

/// cSHAKE128 with fixed function-name and customization strings.
#[derive(Debug, Clone)]
pub struct CShake128 {
    function_name: Vec<u8>,
    customization: Vec<u8>,
}

impl CShake128 {
    pub fn new(function_name: &[u8], customization: &[u8]) -> Self {
        Self {
            function_name: function_name.to_vec(),
            customization: customization.to_vec(),
        }
    }
}

impl HashAlgorithm for CShake128 {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        let core = CShake128Core::new_with_function_name(&self.function_name, &self.customization);
        let mut hasher = sha3::CShake128::from_core(core);
        hasher.update(data);
        let mut reader = hasher.finalize_xof();
        let mut out = [0u8; 32];
        reader.read(&mut out);
        out
    }
}

/// cSHAKE256 with fixed function-name and customization strings (Kaspa's
/// "ProofOfWorkHash" / "HeavyHash" domains).
#[derive(Debug, Clone)]
pub struct CShake256 {
    function_name: Vec<u8>,
    customization: Vec<u8>,
}

impl CShake256 {
    pub fn new(function_name: &[u8], customization: &[u8]) -> Self {
        Self {
            function_name: function_name.to_vec(),
            customization: customization.to_vec(),
        }
    }
}

impl HashAlgorithm for CShake256 {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        let core = CShake256Core::new_with_function_name(&self.function_name, &self.customization);
        let mut hasher = sha3::CShake256::from_core(core);
        hasher.update(data);
        let mut reader = hasher.finalize_xof();
        let mut out = [0u8; 32];
        reader.read(&mut out);
        out
    }
}

/// Reverses the byte order of an upstream digest. Used where the wire format
/// wants the big-endian rendering of a little-endian consensus hash.
#[derive(Debug, Clone)]
pub struct DigestReverser<H> {
    upstream: H,
}

impl<H: HashAlgorithm> DigestReverser<H> {
    pub fn new(upstream: H) -> Self {
        Self { upstream }
    }

    pub fn upstream(&self) -> &H {
        &self.upstream
    }
}

impl<H: HashAlgorithm> HashAlgorithm for DigestReverser<H> {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        let mut out = self.upstream.digest(data);
        out.reverse();
        out
    }
}

/// Equihash-style solution verification.
///
/// `header` is the serialized header with the nonce as its final
/// `nonce_length` bytes; implementations split it back apart as their
/// underlying verifier requires.
pub trait SolutionVerifier: Send + Sync {
    fn verify(&self, header: &[u8], solution: &[u8]) -> bool;
}

impl<T: SolutionVerifier + ?Sized> SolutionVerifier for std::sync::Arc<T> {
    fn verify(&self, header: &[u8], solution: &[u8]) -> bool {
        (**self).verify(header, solution)
    }
}

/// Equihash(n, k) verifier. ZCash-family headers carry a 32-byte nonce, Beam
/// appends an 8-byte nonce to its 32-byte input.
#[derive(Debug, Clone)]
pub struct EquihashVerifier {
    n: u32,
    k: u32,
    nonce_length: usize,
}

impl EquihashVerifier {
    pub fn new(n: u32, k: u32, nonce_length: usize) -> Self {
        Self { n, k, nonce_length }
    }

    /// Equihash 200,9 as used by ZCash-family chains.
    pub fn zcash() -> Self {
        Self::new(200, 9, 32)
    }

    /// Equihash 150,5 as used by Beam.
    pub fn beam() -> Self {
        Self::new(150, 5, 8)
    }
}

impl SolutionVerifier for EquihashVerifier {
    fn verify(&self, header: &[u8], solution: &[u8]) -> bool {
        if header.len() <= self.nonce_length {
            return false;
        }
        let split = header.len() - self.nonce_length;
        let (input, nonce) = header.split_at(split);
        equihash::is_valid_solution(self.n, self.k, input, nonce, solution).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_matches_known_vector() {
        // sha256d("hello") from the Bitcoin wiki.
        let digest = Sha256d.digest(b"hello");
        assert_eq!(
            hex::encode(digest),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn blake2b_keyed_differs_from_unkeyed() {
        let plain = Blake2b::new().digest(b"data");
        let keyed = Blake2b::keyed(b"BlockHash").digest(b"data");
        assert_ne!(plain, keyed);
        // Construction is deterministic.
        assert_eq!(keyed, Blake2b::keyed(b"BlockHash").digest(b"data"));
    }

    #[test]
    fn blake3_domain_key_is_zero_padded() {
        let mut key = [0u8; 32];
        key[..9].copy_from_slice(b"BlockHash");
        let a = Blake3::keyed_from_domain(b"BlockHash").digest(b"data");
        let b = Blake3::keyed(key).digest(b"data");
        assert_eq!(a, b);
    }

    #[test]
    fn cshake_domains_separate() {
        let pow = CShake256::new(b"", b"ProofOfWorkHash").digest(b"data");
        let heavy = CShake256::new(b"", b"HeavyHash").digest(b"data");
        assert_ne!(pow, heavy);
    }

    #[test]
    fn cshake128_is_deterministic() {
        let h = CShake128::new(b"", b"Domain");
        assert_eq!(h.digest(b"x"), h.digest(b"x"));
    }

    #[test]
    fn reverser_reverses() {
        let forward = Sha256d.digest(b"abc");
        let mut expected = forward;
        expected.reverse();
        assert_eq!(DigestReverser::new(Sha256d).digest(b"abc"), expected);
    }

    #[test]
    fn equihash_verifier_rejects_garbage() {
        let verifier = EquihashVerifier::beam();
        let header = [0u8; 40];
        let solution = [0u8; 104];
        assert!(!verifier.verify(&header, &solution));
    }

    #[test]
    fn equihash_verifier_rejects_short_header() {
        let verifier = EquihashVerifier::zcash();
        assert!(!verifier.verify(&[0u8; 16], &[0u8; 1344]));
    }
}
