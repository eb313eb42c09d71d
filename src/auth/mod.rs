pub mod permission;
pub mod resolver;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::types::Token;

/// Wire prefix on every minted secret, so a token pasted into a log or
/// a URL is recognizable at a glance (cosmetic only — carries no
/// security meaning).
pub const TOKEN_PREFIX: &str = "eph_";

/// How much of the encoded secret is kept, unhashed, as a DB lookup key
/// (spec.md §4.1, §5). Short enough to keep the index small, long
/// enough that collisions among live tokens are not expected to matter
/// for performance — the full hash comparison is what actually decides
/// validity.
const LOOKUP_LEN: usize = 12;

const SALT_LEN: usize = 16;
const SECRET_LEN: usize = 32;

/// Newly minted token material. `secret` is the only time the plaintext
/// exists outside this function's caller — the store only ever
/// receives `salt`/`hash`/`lookup`.
pub struct GeneratedToken {
    pub secret: String,
    pub salt: [u8; SALT_LEN],
    pub hash: Vec<u8>,
    pub lookup: String,
}

/// Mint a new random token secret and its storable hash (spec.md §4.1).
pub fn generate_token() -> GeneratedToken {
    let mut secret_bytes = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret_bytes);
    let encoded = URL_SAFE_NO_PAD.encode(secret_bytes);
    let secret = format!("{TOKEN_PREFIX}{encoded}");

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let hash = hash_secret(&salt, &secret);
    let lookup = self::lookup_key(&secret);

    GeneratedToken {
        secret,
        salt,
        hash,
        lookup,
    }
}

fn hash_secret(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

/// The lookup key is derived from the encoded secret itself (not the
/// hash) so the store can narrow candidates with an indexed query
/// before paying for a hash comparison. Used both when minting a token
/// and when resolving a presented one, so it must stay deterministic.
pub(crate) fn lookup_key(secret: &str) -> String {
    secret.chars().take(LOOKUP_LEN).collect()
}

/// Verify a presented secret against one stored `(salt, hash)` pair.
/// Constant-time: a timing side channel here would let an attacker
/// learn the hash byte-by-byte (spec.md §4.1, §7 "Non-goals" does NOT
/// exempt this from defensive coding, unlike the UI surfaces it drops).
pub fn verify_secret(presented: &str, salt: &[u8], expected_hash: &[u8]) -> bool {
    let candidate_hash = hash_secret(salt, presented);
    candidate_hash.ct_eq(expected_hash).into()
}

/// What a request resolved to after credential verification: the token
/// row plus whether it is currently within its validity window. Permit
/// checks in [`permission`] take this alongside a requested action.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: Token,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.token.is_admin
    }
}
