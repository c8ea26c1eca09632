//! Cache key derivation.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::args::{BoundArgs, Signature};

/// Placeholder in a templated key prefix, replaced by the request path.
pub const PATH_PLACEHOLDER: &str = "%s";

/// Default prefix for [`crate::Cached`] entries.
pub const DEFAULT_VIEW_PREFIX: &str = "view/%s";

/// Suffix naming a namespace's version key.
pub const VERSION_SUFFIX: &str = "_memver";

/// Length of a memoized call's hashed argument part.
pub const MEMOIZE_DIGEST_LEN: usize = 16;

/// Length of a version token.
pub const VERSION_TOKEN_LEN: usize = 6;

/// Digest used to shorten cache keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashMethod {
    /// SHA-256.
    #[default]
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl HashMethod {
    /// Raw digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }

    /// Lowercase hex digest of `data`.
    pub fn hexdigest(&self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => format!("{:x}", Sha256::digest(data)),
            Self::Blake3 => blake3::hash(data).to_hex().to_string(),
        }
    }
}

/// How a [`crate::Cached`] wrapper names its entries.
#[derive(Clone)]
pub enum KeyPrefix {
    /// Used as is.
    Literal(String),
    /// Contains [`PATH_PLACEHOLDER`], replaced by the request path.
    Template(String),
    /// Computed on every call.
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl KeyPrefix {
    /// A prefix computed by `f` on every call.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// The key for a call on `path`.
    pub fn render(&self, path: &str) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Template(t) => t.replace(PATH_PLACEHOLDER, path),
            Self::Dynamic(f) => f(),
        }
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::Template(DEFAULT_VIEW_PREFIX.to_string())
    }
}

impl From<&str> for KeyPrefix {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<String> for KeyPrefix {
    fn from(s: String) -> Self {
        if s.contains(PATH_PLACEHOLDER) {
            Self::Template(s)
        } else {
            Self::Literal(s)
        }
    }
}

impl fmt::Debug for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Template(s) => f.debug_tuple("Template").field(s).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Key for a request whose query string takes part in the key.
///
/// The pairs are sorted first, so parameter order does not matter.
pub fn query_string_key(path: &str, query: &[(String, String)], hash: HashMethod) -> String {
    let mut pairs = query.to_vec();
    pairs.sort();
    let canonical = format!("{pairs:?}");
    format!("{path}{}", hash.hexdigest(canonical.as_bytes()))
}

/// Function namespace and, for receivers, the instance namespace.
///
/// Both keep only ASCII letters, digits, `_` and `.`.
pub fn function_namespace(signature: &Signature, instance: Option<&str>) -> (String, Option<String>) {
    let base = format!("{}.{}", signature.module(), signature.qualname());
    let instance_ns = instance.map(|token| sanitize(&format!("{base}.{token}")));
    (sanitize(&base), instance_ns)
}

/// Name of the version key for `namespace`.
pub fn version_key(namespace: &str) -> String {
    format!("{namespace}{VERSION_SUFFIX}")
}

/// A fresh random version token.
pub fn new_version_token() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut token = STANDARD.encode(bytes);
    token.truncate(VERSION_TOKEN_LEN);
    token
}

/// Key of one memoized call, without the global prefix.
///
/// `name` is the (possibly renamed) function namespace, `identity` the
/// receiver's identity token and `version` the concatenated version tokens.
pub fn memoize_key(
    name: &str,
    identity: Option<&str>,
    args: &BoundArgs,
    hash: HashMethod,
    version: &str,
) -> String {
    let updated = format!("{name}{}", args.canonical(identity));
    let mut key = STANDARD.encode(hash.digest(updated.as_bytes()));
    key.truncate(MEMOIZE_DIGEST_LEN);
    key.push_str(version);
    key
}

fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}
