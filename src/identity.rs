//! Node identity derivation.
//!
//! Out of scope for the coordination core itself, but a runnable binary
//! still needs *some* way to turn `--name`/`--password`
//! into the stable 8-character `node_id` every other module treats as an
//! opaque string. A deterministic hash keeps the same identity across
//! restarts for the same credentials without pretending to be a real
//! authentication scheme.

use sha2::{Digest, Sha256};

/// Derive the stable 8-character node id from `(display_name, password)`.
pub fn derive_node_id(display_name: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(display_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for b in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{:02x}", b));
    }
    s.truncate(chars);
    s
}
