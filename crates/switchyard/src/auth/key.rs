//! API-key material: generation, parsing, hashing, verification.
//!
//! Wire format: `sk_<publicId:12>.<secret>`. The ledger stores the public id,
//! a display prefix, and `hex(sha256(raw_key))`; the raw key is returned once
//! from the creation endpoint and never again.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::database::models::NewApiKey;
use crate::database::now_rfc3339;

pub const PUBLIC_ID_LEN: usize = 12;

/// A freshly minted key: the insertable row plus the one-time raw key.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub row: NewApiKey,
    pub raw_key: String,
}

/// Mint a new API key scoped to `(tenant, project, graph)`.
pub fn generate_key(tenant_id: &str, project_id: &str, graph_id: &str) -> GeneratedKey {
    let mut public_id = uuid::Uuid::new_v4().simple().to_string();
    public_id.truncate(PUBLIC_ID_LEN);

    let mut secret = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    let raw_key = format!("sk_{public_id}.{secret}");
    secret.zeroize();

    let row = NewApiKey {
        tenant_id: tenant_id.to_string(),
        project_id: project_id.to_string(),
        graph_id: graph_id.to_string(),
        id: crate::short_id(),
        public_id: public_id.clone(),
        key_hash: hash_key(&raw_key),
        key_prefix: format!("sk_{public_id}..."),
        expires_at: None,
        last_used_at: None,
        created_at: now_rfc3339(),
    };

    GeneratedKey { row, raw_key }
}

/// Split a presented key into `(public_id, secret)`. Returns `None` for
/// anything that does not match the wire format.
pub fn parse_key(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("sk_")?;
    let (public_id, secret) = rest.split_once('.')?;
    if public_id.len() != PUBLIC_ID_LEN || secret.is_empty() {
        return None;
    }
    if !public_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((public_id, secret))
}

/// Hex SHA-256 of the full raw key.
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a presented key against a stored hash.
pub fn verify_key(raw: &str, stored_hash: &str) -> bool {
    let presented = hash_key(raw);
    if presented.len() != stored_hash.len() {
        return false;
    }
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_matches_wire_format() {
        let generated = generate_key("t", "p", "g");
        let (public_id, secret) = parse_key(&generated.raw_key).unwrap();
        assert_eq!(public_id.len(), PUBLIC_ID_LEN);
        assert!(!secret.is_empty());
        assert_eq!(generated.row.public_id, public_id);
        assert!(generated.row.key_prefix.starts_with("sk_"));
    }

    #[test]
    fn verify_round_trip() {
        let generated = generate_key("t", "p", "g");
        assert!(verify_key(&generated.raw_key, &generated.row.key_hash));
        assert!(!verify_key("sk_000000000000.nope", &generated.row.key_hash));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(parse_key("").is_none());
        assert!(parse_key("sk_short.secret").is_none());
        assert!(parse_key("sk_abcdefabcdef").is_none());
        assert!(parse_key("sk_abcdefabcdef.").is_none());
        assert!(parse_key("pk_abcdefabcdef.secret").is_none());
        assert!(parse_key("sk_abcdef-bcdef.secret").is_none());
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let h1 = hash_key("sk_abcdefabcdef.secret");
        let h2 = hash_key("sk_abcdefabcdef.secret");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
