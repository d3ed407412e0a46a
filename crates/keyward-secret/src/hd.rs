//! Hierarchical deterministic derivation from a seed envelope.
//!
//! secp256k1 follows BIP-32 (via the `bip32` crate). ed25519 follows
//! SLIP-10, which only defines hardened children. Every batch call reveals
//! the seed once, walks a per-batch path cache so shared prefixes are
//! derived once, and returns public material only.

use bip32::{ChildNumber, XPrv};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

use crate::envelope::{RevealableSeed, SeedEnvelope, with_revealed_seed, with_revealed_seed_in};
use crate::error::SecretError;
use crate::session::SecretSession;
use crate::store::{self, hash160};

type HmacSha512 = Hmac<Sha512>;

const HARDENED_OFFSET: u32 = 1 << 31;

const SLIP10_ED25519_SEED: &[u8] = b"ed25519 seed";

/// Curves supported for derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    Secp256k1,
    Ed25519,
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Secp256k1 => write!(f, "secp256k1"),
            Curve::Ed25519 => write!(f, "ed25519"),
        }
    }
}

impl FromStr for Curve {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(Curve::Secp256k1),
            "ed25519" => Ok(Curve::Ed25519),
            other => Err(SecretError::UnsupportedCurve(other.to_string())),
        }
    }
}

/// One step of a derivation path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathStep {
    pub index: u32,
    pub hardened: bool,
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Parse `m/44'/0'/0'/0/0`, `44h/0h` or a relative `0/1`.
///
/// A leading `m` (or a bare `m`) is optional; `'` and `h` mark hardened
/// steps.
pub fn parse_path(path: &str) -> Result<Vec<PathStep>, SecretError> {
    let trimmed = path.trim();
    let body = match trimmed {
        "" | "m" | "M" => return Ok(Vec::new()),
        _ => trimmed
            .strip_prefix("m/")
            .or_else(|| trimmed.strip_prefix("M/"))
            .unwrap_or(trimmed),
    };

    body.split('/')
        .map(|part| {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| SecretError::InvalidPath(format!("bad component '{part}' in {path}")))?;
            if index >= HARDENED_OFFSET {
                return Err(SecretError::InvalidPath(format!("index {index} out of range in {path}")));
            }
            Ok(PathStep { index, hardened })
        })
        .collect()
}

fn render_path(steps: &[PathStep]) -> String {
    let mut out = String::from("m");
    for step in steps {
        out.push('/');
        out.push_str(&step.to_string());
    }
    out
}

/// Join a prefix and a relative path into a normalized full path.
pub fn join_path(prefix: &str, relative: &str) -> Result<String, SecretError> {
    let mut steps = parse_path(prefix)?;
    steps.extend(parse_path(relative)?);
    Ok(render_path(&steps))
}

/// Public extended key material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedKey {
    pub depth: u8,
    pub chain_code: [u8; 32],
    pub key: Vec<u8>,
}

/// Result of deriving one path. Contains no private material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedKey {
    /// Normalized full path.
    pub path: String,
    pub parent_fingerprint: [u8; 4],
    /// 33-byte compressed point for secp256k1, 32 bytes for ed25519.
    pub public_key: Vec<u8>,
    pub extended_key: ExtendedKey,
}

#[derive(Clone)]
enum Node {
    Secp(XPrv),
    Ed {
        key: Zeroizing<[u8; 32]>,
        chain_code: [u8; 32],
    },
}

impl Node {
    fn master(curve: Curve, seed: &[u8]) -> Result<Self, SecretError> {
        match curve {
            Curve::Secp256k1 => XPrv::new(seed)
                .map(Node::Secp)
                .map_err(|e| SecretError::KeyDerivation(format!("master key: {e}"))),
            Curve::Ed25519 => {
                let (key, chain_code) = slip10_split(SLIP10_ED25519_SEED, &[seed])?;
                Ok(Node::Ed { key, chain_code })
            }
        }
    }

    fn child(&self, step: PathStep) -> Result<Self, SecretError> {
        match self {
            Node::Secp(xprv) => {
                let number = ChildNumber::new(step.index, step.hardened)
                    .map_err(|e| SecretError::InvalidPath(e.to_string()))?;
                xprv.derive_child(number)
                    .map(Node::Secp)
                    .map_err(|e| SecretError::KeyDerivation(e.to_string()))
            }
            Node::Ed { key, chain_code } => {
                if !step.hardened {
                    return Err(SecretError::InvalidPath(format!(
                        "ed25519 supports hardened steps only, got {step}"
                    )));
                }
                let index = (step.index | HARDENED_OFFSET).to_be_bytes();
                let (key, chain_code) = slip10_split(chain_code, &[&[0u8], key.as_slice(), &index])?;
                Ok(Node::Ed { key, chain_code })
            }
        }
    }

    fn public_key(&self) -> Vec<u8> {
        match self {
            Node::Secp(xprv) => xprv.public_key().to_bytes().to_vec(),
            Node::Ed { key, .. } => ed25519_dalek::SigningKey::from_bytes(key)
                .verifying_key()
                .to_bytes()
                .to_vec(),
        }
    }

    /// First four bytes of HASH160 of the serialized public key. ed25519
    /// keys are serialized with a leading zero byte.
    fn fingerprint(&self) -> Result<[u8; 4], SecretError> {
        let mut serialized = self.public_key();
        if matches!(self, Node::Ed { .. }) {
            serialized.insert(0, 0);
        }
        let digest = hash160(&serialized)?;
        Ok([digest[0], digest[1], digest[2], digest[3]])
    }

    fn chain_code(&self) -> [u8; 32] {
        match self {
            Node::Secp(xprv) => xprv.attrs().chain_code,
            Node::Ed { chain_code, .. } => *chain_code,
        }
    }

    fn private_key(&self) -> Zeroizing<[u8; 32]> {
        match self {
            Node::Secp(xprv) => Zeroizing::new(xprv.private_key().to_bytes().into()),
            Node::Ed { key, .. } => key.clone(),
        }
    }
}

fn slip10_split(key: &[u8], parts: &[&[u8]]) -> Result<(Zeroizing<[u8; 32]>, [u8; 32]), SecretError> {
    let mut mac = HmacSha512::new_from_slice(key).map_err(|e| SecretError::KeyDerivation(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let mut buf = [0u8; 64];
    buf.copy_from_slice(&mac.finalize().into_bytes());
    let mut child = Zeroizing::new([0u8; 32]);
    let mut chain_code = [0u8; 32];
    child.copy_from_slice(&buf[..32]);
    chain_code.copy_from_slice(&buf[32..]);
    buf.zeroize();
    Ok((child, chain_code))
}

/// Derivation walker with a cache keyed by normalized full path.
struct PathCache {
    nodes: HashMap<String, Node>,
}

impl PathCache {
    fn new(curve: Curve, seed: &[u8]) -> Result<Self, SecretError> {
        let mut nodes = HashMap::new();
        nodes.insert("m".to_string(), Node::master(curve, seed)?);
        Ok(Self { nodes })
    }

    /// Derive `steps`, reusing and filling the cache for every prefix.
    fn node(&mut self, steps: &[PathStep]) -> Result<&Node, SecretError> {
        let mut parent_path = String::from("m");
        for (depth, step) in steps.iter().enumerate() {
            let path = format!("{parent_path}/{step}");
            if !self.nodes.contains_key(&path) {
                let parent = self
                    .nodes
                    .get(&parent_path)
                    .ok_or_else(|| SecretError::KeyDerivation(format!("missing parent at depth {depth}")))?;
                let child = parent.child(*step)?;
                self.nodes.insert(path.clone(), child);
            }
            parent_path = path;
        }
        self.nodes
            .get(&parent_path)
            .ok_or_else(|| SecretError::KeyDerivation(format!("missing node {parent_path}")))
    }

    fn derive(&mut self, steps: &[PathStep]) -> Result<DerivedKey, SecretError> {
        let parent_fingerprint = match steps.split_last() {
            Some((_, parent)) => self.node(parent)?.fingerprint()?,
            None => [0u8; 4],
        };
        let node = self.node(steps)?;
        let public_key = node.public_key();
        Ok(DerivedKey {
            path: render_path(steps),
            parent_fingerprint,
            extended_key: ExtendedKey {
                depth: u8::try_from(steps.len())
                    .map_err(|_| SecretError::InvalidPath("path deeper than 255".into()))?,
                chain_code: node.chain_code(),
                key: public_key.clone(),
            },
            public_key,
        })
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

fn parse_batch(prefix: &str, rel_paths: &[String]) -> Result<Vec<Vec<PathStep>>, SecretError> {
    let base = parse_path(prefix)?;
    rel_paths
        .iter()
        .map(|rel| {
            let mut steps = base.clone();
            steps.extend(parse_path(rel)?);
            Ok(steps)
        })
        .collect()
}

fn derive_batch(seed: &RevealableSeed, curve: Curve, batch: &[Vec<PathStep>]) -> Result<Vec<DerivedKey>, SecretError> {
    let mut cache = PathCache::new(curve, seed.seed())?;
    let keys = batch
        .iter()
        .map(|steps| cache.derive(steps))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(%curve, paths = keys.len(), nodes = cache.len(), "derived address batch");
    Ok(keys)
}

fn private_key_at<T, F>(seed: &RevealableSeed, curve: Curve, steps: &[PathStep], f: F) -> Result<T, SecretError>
where
    F: FnOnce(&[u8; 32]) -> Result<T, SecretError>,
{
    let mut cache = PathCache::new(curve, seed.seed())?;
    let key = cache.node(steps)?.private_key();
    f(&key)
}

/// Derive public keys for `prefix/rel` for each relative path, in order.
pub fn derive_addresses(
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    prefix: &str,
    rel_paths: &[String],
) -> Result<Vec<DerivedKey>, SecretError> {
    let batch = parse_batch(prefix, rel_paths)?;
    with_revealed_seed(envelope, password, |seed| derive_batch(seed, curve, &batch))
}

/// [`derive_addresses`] with the envelope key served from the session cache.
pub fn derive_addresses_in(
    session: &SecretSession,
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    prefix: &str,
    rel_paths: &[String],
) -> Result<Vec<DerivedKey>, SecretError> {
    let batch = parse_batch(prefix, rel_paths)?;
    with_revealed_seed_in(session, envelope, password, |seed| derive_batch(seed, curve, &batch))
}

/// Like [`derive_addresses`] but derives every path from the master key
/// with no shared cache.
pub fn derive_addresses_individually(
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    prefix: &str,
    rel_paths: &[String],
) -> Result<Vec<DerivedKey>, SecretError> {
    let batch = parse_batch(prefix, rel_paths)?;
    with_revealed_seed(envelope, password, |seed| {
        batch
            .iter()
            .map(|steps| PathCache::new(curve, seed.seed())?.derive(steps))
            .collect()
    })
}

/// [`derive_addresses`] on the blocking pool.
pub async fn derive_addresses_async(
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    prefix: &str,
    rel_paths: &[String],
) -> Result<Vec<DerivedKey>, SecretError> {
    let envelope = envelope.clone();
    let password = Zeroizing::new(password.to_vec());
    let prefix = prefix.to_string();
    let rel_paths = rel_paths.to_vec();
    store::offload(move || derive_addresses(&envelope, &password, curve, &prefix, &rel_paths)).await
}

/// [`derive_addresses_in`] on the blocking pool.
pub async fn derive_addresses_async_in(
    session: Arc<SecretSession>,
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    prefix: &str,
    rel_paths: &[String],
) -> Result<Vec<DerivedKey>, SecretError> {
    let envelope = envelope.clone();
    let password = Zeroizing::new(password.to_vec());
    let prefix = prefix.to_string();
    let rel_paths = rel_paths.to_vec();
    store::offload(move || derive_addresses_in(&session, &envelope, &password, curve, &prefix, &rel_paths)).await
}

/// Run `f` with the private key at `full_path`. The key is zeroized when
/// this returns.
pub fn derive_private_key<T, F>(
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    full_path: &str,
    f: F,
) -> Result<T, SecretError>
where
    F: FnOnce(&[u8; 32]) -> Result<T, SecretError>,
{
    let steps = parse_path(full_path)?;
    with_revealed_seed(envelope, password, |seed| private_key_at(seed, curve, &steps, f))
}

/// [`derive_private_key`] with the envelope key served from the session cache.
pub fn derive_private_key_in<T, F>(
    session: &SecretSession,
    envelope: &SeedEnvelope,
    password: &[u8],
    curve: Curve,
    full_path: &str,
    f: F,
) -> Result<T, SecretError>
where
    F: FnOnce(&[u8; 32]) -> Result<T, SecretError>,
{
    let steps = parse_path(full_path)?;
    with_revealed_seed_in(session, envelope, password, |seed| private_key_at(seed, curve, &steps, f))
}

/// Master key fingerprint as 8 lowercase hex characters.
pub fn root_fingerprint(envelope: &SeedEnvelope, password: &[u8], curve: Curve) -> Result<String, SecretError> {
    with_revealed_seed(envelope, password, |seed| {
        let master = Node::master(curve, seed.seed())?;
        Ok(hex::encode(master.fingerprint()?))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RevealableSeed, encrypt_seed};
    use crate::store::tests::TEST_KDF;

    const ENTROPY: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];

    fn envelope() -> SeedEnvelope {
        let seed = RevealableSeed::from_entropy(&ENTROPY, "").unwrap();
        encrypt_seed(&seed, b"pw", TEST_KDF).unwrap()
    }

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    // --- Paths ---

    #[test]
    fn parse_path_forms() {
        assert!(parse_path("m").unwrap().is_empty());
        assert!(parse_path("").unwrap().is_empty());
        let steps = parse_path("m/44'/0h/7").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep { index: 44, hardened: true },
                PathStep { index: 0, hardened: true },
                PathStep { index: 7, hardened: false },
            ]
        );
    }

    #[test]
    fn parse_path_rejects_garbage() {
        assert!(matches!(parse_path("m/x"), Err(SecretError::InvalidPath(_))));
        assert!(matches!(parse_path("m//1"), Err(SecretError::InvalidPath(_))));
        assert!(matches!(parse_path("m/2147483648"), Err(SecretError::InvalidPath(_))));
    }

    #[test]
    fn join_normalizes() {
        assert_eq!(join_path("m/44h", "0/1").unwrap(), "m/44'/0/1");
        assert_eq!(join_path("m", "").unwrap(), "m");
    }

    #[test]
    fn curve_names() {
        assert_eq!("secp256k1".parse::<Curve>().unwrap(), Curve::Secp256k1);
        assert_eq!("ED25519".parse::<Curve>().unwrap(), Curve::Ed25519);
        assert_eq!(
            "nistp256".parse::<Curve>().unwrap_err(),
            SecretError::UnsupportedCurve("nistp256".into())
        );
    }

    // --- Derivation ---

    #[test]
    fn batch_matches_individual() {
        let env = envelope();
        let rel = paths(&["0/0", "0/1", "44'/0'/0'/0/0"]);
        let batched = derive_addresses(&env, b"pw", Curve::Secp256k1, "m", &rel).unwrap();
        let single = derive_addresses_individually(&env, b"pw", Curve::Secp256k1, "m", &rel).unwrap();
        assert_eq!(batched, single);
        assert_eq!(batched.len(), 3);
        assert_eq!(batched[0].path, "m/0/0");
        assert_eq!(batched[2].path, "m/44'/0'/0'/0/0");
        assert_ne!(batched[0].public_key, batched[1].public_key);
        // Siblings share a parent.
        assert_eq!(batched[0].parent_fingerprint, batched[1].parent_fingerprint);
    }

    #[test]
    fn secp_keys_are_compressed_points() {
        let keys = derive_addresses(&envelope(), b"pw", Curve::Secp256k1, "m/44'/111111'/0'", &paths(&["0/0"]))
            .unwrap();
        assert_eq!(keys[0].public_key.len(), 33);
        assert!(matches!(keys[0].public_key[0], 0x02 | 0x03));
        assert_eq!(keys[0].extended_key.depth, 5);
    }

    #[test]
    fn bip32_test_vector_1_master_fingerprint() {
        // BIP-32 test vector 1 seed; master fingerprint 3442193e.
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = Node::master(Curve::Secp256k1, &seed).unwrap();
        assert_eq!(hex::encode(master.fingerprint().unwrap()), "3442193e");
    }

    #[test]
    fn slip10_test_vector_1_master() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = Node::master(Curve::Ed25519, &seed).unwrap();
        assert_eq!(
            hex::encode(master.chain_code()),
            "90046a93de5380a72b5e45010748567d5ea02bbf6522f979e05c0d8d8ca9fffb"
        );
        assert_eq!(
            hex::encode(master.public_key()),
            "a4b2856bfec510abab89753fac1ac0e1112364e7d250545963f135f2a33188ed"
        );
    }

    #[test]
    fn ed25519_hardened_only() {
        let env = envelope();
        let ok = derive_addresses(&env, b"pw", Curve::Ed25519, "m/44'/501'", &paths(&["0'", "1'"])).unwrap();
        assert_eq!(ok[0].public_key.len(), 32);
        assert!(matches!(
            derive_addresses(&env, b"pw", Curve::Ed25519, "m/44'/501'", &paths(&["0"])),
            Err(SecretError::InvalidPath(_))
        ));
    }

    #[test]
    fn wrong_password_propagates() {
        assert_eq!(
            derive_addresses(&envelope(), b"bad", Curve::Secp256k1, "m", &paths(&["0"])).unwrap_err(),
            SecretError::WrongPassword
        );
    }

    #[test]
    fn private_key_matches_public() {
        let env = envelope();
        let derived = derive_addresses(&env, b"pw", Curve::Secp256k1, "m/44'/0'/0'", &paths(&["0/3"])).unwrap();
        let pubkey = derive_private_key(&env, b"pw", Curve::Secp256k1, &derived[0].path, |secret| {
            use bip32::{PrivateKey, PublicKey};
            let signing = bip32::secp256k1::ecdsa::SigningKey::from_bytes(&(*secret).into())
                .map_err(|e| SecretError::KeyDerivation(e.to_string()))?;
            Ok(signing.public_key().to_bytes().to_vec())
        })
        .unwrap();
        assert_eq!(pubkey, derived[0].public_key);
    }

    #[test]
    fn fingerprint_stable_and_curve_specific() {
        let env = envelope();
        let a = root_fingerprint(&env, b"pw", Curve::Secp256k1).unwrap();
        let b = root_fingerprint(&env, b"pw", Curve::Secp256k1).unwrap();
        let c = root_fingerprint(&env, b"pw", Curve::Ed25519).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn async_matches_sync() {
        let env = envelope();
        let rel = paths(&["0/0", "0/1"]);
        let sync = derive_addresses(&env, b"pw", Curve::Secp256k1, "m/44'/0'/0'", &rel).unwrap();
        let asynced = derive_addresses_async(&env, b"pw", Curve::Secp256k1, "m/44'/0'/0'", &rel)
            .await
            .unwrap();
        assert_eq!(sync, asynced);
    }

    #[tokio::test]
    async fn session_derivation_reuses_envelope_key() {
        let env = envelope();
        let session = Arc::new(SecretSession::unlocked());
        let rel = paths(&["0/0", "0/1"]);
        let plain = derive_addresses(&env, b"pw", Curve::Secp256k1, "m/44'/0'/0'", &rel).unwrap();
        let cached = derive_addresses_in(&session, &env, b"pw", Curve::Secp256k1, "m/44'/0'/0'", &rel).unwrap();
        let offloaded = derive_addresses_async_in(Arc::clone(&session), &env, b"pw", Curve::Secp256k1, "m/44'/0'/0'", &rel)
            .await
            .unwrap();
        assert_eq!(plain, cached);
        assert_eq!(plain, offloaded);

        let secret = derive_private_key_in(&session, &env, b"pw", Curve::Secp256k1, &plain[0].path, |s| Ok(*s)).unwrap();
        let direct = derive_private_key(&env, b"pw", Curve::Secp256k1, &plain[0].path, |s| Ok(*s)).unwrap();
        assert_eq!(secret, direct);
        assert_eq!(session.cached_key_count(), 1);
    }
}
