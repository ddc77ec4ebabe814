// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Apache htpasswd files.
//!
//! One `user:hash` entry per line; blank lines and `#` comments are
//! skipped. Supported hashes:
//!
//! | Prefix                    | Scheme                              |
//! |---------------------------|-------------------------------------|
//! | `$apr1$`                  | Apache MD5 (`htpasswd`, the default) |
//! | `$2y$`, `$2b$`, `$2a$`    | bcrypt (`htpasswd -B`)              |
//! | `{SHA}`                   | base64 SHA-1 (`htpasswd -s`)        |
//! | `{SSHA}`                  | base64 salted SHA-1                 |
//! | `$1$`, `$5$`, `$6$`       | crypt MD5, SHA-256, SHA-512 (`htpasswd -2`/`-5`) |
//!
//! Any other format is rejected when the file is loaded, so a bad entry
//! shows up at startup rather than as a failed login.

use super::CredentialStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::Md5;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const APR1_MAGIC: &str = "$apr1$";

/// crypt(3) base64 alphabet.
const CRYPT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum HtpasswdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: expected 'user:hash'")]
    Malformed { line: usize },

    #[error("line {line}: unsupported hash format for user '{user}'")]
    UnsupportedHash { line: usize, user: String },

    #[error("line {line}: invalid hash for user '{user}'")]
    InvalidDigest { line: usize, user: String },
}

#[derive(Debug, Clone)]
enum Hash {
    Apr1 { salt: String, checksum: String },
    Bcrypt(String),
    Sha1([u8; 20]),
    SaltedSha1 { digest: [u8; 20], salt: Vec<u8> },
    Crypt(String),
}

impl Hash {
    /// Parse one hash field. `Ok(None)` means the scheme is unknown.
    fn parse(hash: &str) -> Result<Option<Self>, ()> {
        if let Some(rest) = hash.strip_prefix(APR1_MAGIC) {
            let (salt, checksum) = rest.split_once('$').ok_or(())?;
            if salt.is_empty() || checksum.len() != 22 {
                return Err(());
            }
            return Ok(Some(Hash::Apr1 {
                salt: salt.to_string(),
                checksum: checksum.to_string(),
            }));
        }
        if ["$2y$", "$2b$", "$2a$"].iter().any(|p| hash.starts_with(p)) {
            return Ok(Some(Hash::Bcrypt(hash.to_string())));
        }
        if let Some(encoded) = hash.strip_prefix("{SHA}") {
            let bytes = STANDARD.decode(encoded).map_err(|_| ())?;
            let digest = <[u8; 20]>::try_from(bytes).map_err(|_| ())?;
            return Ok(Some(Hash::Sha1(digest)));
        }
        if let Some(encoded) = hash.strip_prefix("{SSHA}") {
            let bytes = STANDARD.decode(encoded).map_err(|_| ())?;
            if bytes.len() <= 20 {
                return Err(());
            }
            let (digest, salt) = bytes.split_at(20);
            let digest = <[u8; 20]>::try_from(digest).map_err(|_| ())?;
            return Ok(Some(Hash::SaltedSha1 {
                digest,
                salt: salt.to_vec(),
            }));
        }
        if ["$1$", "$5$", "$6$"].iter().any(|p| hash.starts_with(p)) {
            return Ok(Some(Hash::Crypt(hash.to_string())));
        }
        Ok(None)
    }

    fn matches(&self, pass: &str) -> bool {
        match self {
            Hash::Apr1 { salt, checksum } => {
                let computed = md5_crypt(pass.as_bytes(), salt.as_bytes(), APR1_MAGIC);
                let computed_checksum = computed.rsplit('$').next().unwrap_or_default();
                same_bytes(computed_checksum.as_bytes(), checksum.as_bytes())
            }
            Hash::Bcrypt(hash) => bcrypt::verify(pass, hash).unwrap_or(false),
            Hash::Sha1(expected) => same_bytes(&Sha1::digest(pass.as_bytes()), expected),
            Hash::SaltedSha1 { digest, salt } => {
                let mut hasher = Sha1::new();
                hasher.update(pass.as_bytes());
                hasher.update(salt);
                same_bytes(&hasher.finalize(), digest)
            }
            Hash::Crypt(hash) => pwhash::unix::verify(pass, hash),
        }
    }
}

/// Compare every byte regardless of the first mismatch.
fn same_bytes(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// MD5-based crypt as used by FreeBSD (`$1$`) and Apache (`$apr1$`).
///
/// Returns the full `<magic><salt>$<checksum>` string. The salt is cut to
/// eight bytes.
fn md5_crypt(pass: &[u8], salt: &[u8], magic: &str) -> String {
    let salt = &salt[..salt.len().min(8)];

    let alternate = {
        let mut ctx = Md5::new();
        ctx.update(pass);
        ctx.update(salt);
        ctx.update(pass);
        ctx.finalize()
    };

    let mut ctx = Md5::new();
    ctx.update(pass);
    ctx.update(magic.as_bytes());
    ctx.update(salt);
    for chunk in pass.chunks(16) {
        ctx.update(&alternate[..chunk.len()]);
    }
    let mut bits = pass.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pass[..1]);
        }
        bits >>= 1;
    }
    let mut digest = ctx.finalize();

    for round in 0..1000 {
        let mut ctx = Md5::new();
        if round % 2 == 1 {
            ctx.update(pass);
        } else {
            ctx.update(&digest);
        }
        if round % 3 != 0 {
            ctx.update(salt);
        }
        if round % 7 != 0 {
            ctx.update(pass);
        }
        if round % 2 == 1 {
            ctx.update(&digest);
        } else {
            ctx.update(pass);
        }
        digest = ctx.finalize();
    }

    let mut out = String::with_capacity(magic.len() + salt.len() + 23);
    out.push_str(magic);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');
    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let group =
            (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_crypt64(&mut out, group, 4);
    }
    push_crypt64(&mut out, u32::from(digest[11]), 2);
    out
}

fn push_crypt64(out: &mut String, mut value: u32, chars: usize) {
    for _ in 0..chars {
        out.push(char::from(CRYPT_ALPHABET[(value & 0x3f) as usize]));
        value >>= 6;
    }
}

/// Credentials loaded from an htpasswd file.
#[derive(Debug, Clone, Default)]
pub struct HtpasswdStore {
    entries: HashMap<String, Hash>,
}

impl HtpasswdStore {
    /// Load a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, HtpasswdError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse htpasswd content. A user listed twice keeps the last entry.
    pub fn parse(content: &str) -> Result<Self, HtpasswdError> {
        let mut entries = HashMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let (user, hash) = text
                .split_once(':')
                .filter(|(user, hash)| !user.is_empty() && !hash.is_empty())
                .ok_or(HtpasswdError::Malformed { line })?;

            let hash = match Hash::parse(hash) {
                Ok(Some(hash)) => hash,
                Ok(None) => {
                    return Err(HtpasswdError::UnsupportedHash {
                        line,
                        user: user.to_string(),
                    })
                }
                Err(()) => {
                    return Err(HtpasswdError::InvalidDigest {
                        line,
                        user: user.to_string(),
                    })
                }
            };

            entries.insert(user.to_string(), hash);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for HtpasswdStore {
    fn verify(&self, user: &str, pass: &str) -> bool {
        self.entries
            .get(user)
            .map(|hash| hash.matches(pass))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sha_entry(user: &str, pass: &str) -> String {
        format!("{}:{{SHA}}{}", user, STANDARD.encode(Sha1::digest(pass.as_bytes())))
    }

    #[test]
    fn test_apr1_entry_verifies() {
        // Output of `htpasswd -nbm myName myPassword`.
        let store = HtpasswdStore::parse("myName:$apr1$r31.....$HqJZimcKQFAMYayBlzkrA/").unwrap();

        assert!(store.verify("myName", "myPassword"));
        assert!(!store.verify("myName", "mypassword"));
    }

    #[test]
    fn test_md5_crypt_matches_freebsd_variant() {
        let ours = md5_crypt(b"hunter2", b"saltsalt", "$1$");
        let reference = pwhash::md5_crypt::hash_with("$1$saltsalt$", "hunter2").unwrap();
        assert_eq!(ours, reference);

        let apr1 = md5_crypt(b"hunter2", b"saltsalt", APR1_MAGIC);
        let store = HtpasswdStore::parse(&format!("meter1:{}", apr1)).unwrap();
        assert!(store.verify("meter1", "hunter2"));
        assert!(!store.verify("meter1", "hunter3"));
    }

    #[test]
    fn test_bcrypt_entry_verifies() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let store = HtpasswdStore::parse(&format!("meter1:{}\n", hash)).unwrap();

        assert!(store.verify("meter1", "secret"));
        assert!(!store.verify("meter1", "wrong"));
        assert!(!store.verify("meter2", "secret"));
    }

    #[test]
    fn test_apache_2y_prefix_accepted() {
        let hash = bcrypt::hash("pw", 4).unwrap().replacen("$2b$", "$2y$", 1);
        let store = HtpasswdStore::parse(&format!("u:{}", hash)).unwrap();
        assert!(store.verify("u", "pw"));
    }

    #[test]
    fn test_sha_entry_verifies() {
        let content = format!(
            "# devices\n\n{}\nmyName:{{SHA}}VBPuJHI7uixaa6LQGWx4s+5GKNE=\n",
            sha_entry("meter1", "hunter2")
        );
        let store = HtpasswdStore::parse(&content).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.verify("meter1", "hunter2"));
        assert!(!store.verify("meter1", "hunter3"));
        assert!(store.verify("myName", "myPassword"));
    }

    #[test]
    fn test_salted_sha_entry_verifies() {
        let salt = b"n4Cl";
        let mut hasher = Sha1::new();
        hasher.update(b"secret");
        hasher.update(salt);
        let mut raw = hasher.finalize().to_vec();
        raw.extend_from_slice(salt);

        let store = HtpasswdStore::parse(&format!("meter1:{{SSHA}}{}", STANDARD.encode(raw))).unwrap();
        assert!(store.verify("meter1", "secret"));
        assert!(!store.verify("meter1", "secret2"));
    }

    #[test]
    fn test_sha256_crypt_entry_verifies() {
        let store =
            HtpasswdStore::parse("u:$5$saltstring$5B8vYYiY.CVt1RlTTf8KbXBH3hsxY/GNooZF4tXl8Z5").unwrap();
        assert!(store.verify("u", "Hello world!"));
        assert!(!store.verify("u", "Hello world"));
    }

    #[test]
    fn test_sha512_crypt_entry_verifies() {
        let hash = pwhash::sha512_crypt::hash("pw").unwrap();
        let store = HtpasswdStore::parse(&format!("u:{}", hash)).unwrap();
        assert!(store.verify("u", "pw"));
        assert!(!store.verify("u", "pw2"));
    }

    #[test]
    fn test_verify_is_deterministic() {
        let store = HtpasswdStore::parse(&sha_entry("a", "b")).unwrap();
        for _ in 0..3 {
            assert!(store.verify("a", "b"));
            assert!(!store.verify("a", ""));
        }
    }

    #[test]
    fn test_unsupported_hash_rejected() {
        for content in ["u:plaintext", "u:{MD5}abcd", "u:$y$j9T$abc$def"] {
            assert!(
                matches!(
                    HtpasswdStore::parse(content),
                    Err(HtpasswdError::UnsupportedHash { line: 1, .. })
                ),
                "{}",
                content
            );
        }
    }

    #[test]
    fn test_malformed_line_rejected() {
        assert!(matches!(
            HtpasswdStore::parse("ok:{SHA}x\nno-colon"),
            Err(HtpasswdError::InvalidDigest { line: 1, .. })
        ));
        assert!(matches!(
            HtpasswdStore::parse("u:$apr1$nochecksum"),
            Err(HtpasswdError::InvalidDigest { line: 1, .. })
        ));
        assert!(matches!(
            HtpasswdStore::parse("no-colon"),
            Err(HtpasswdError::Malformed { line: 1 })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", sha_entry("meter1", "pw")).unwrap();

        let store = HtpasswdStore::from_file(file.path()).unwrap();
        assert!(store.verify("meter1", "pw"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            HtpasswdStore::from_file("/nonexistent/htpasswd"),
            Err(HtpasswdError::Io(_))
        ));
    }
}
