//! # File Store
//!
//! The on-disk layout shared by every node:
//!
//! ```text
//! <data_dir>/
//! ├── bchain.bc                 whole-chain serialization
//! ├── mktrees/<root>.mkt        one Merkle artifact per sealed batch
//! └── users/<name>/
//!     ├── <name>.pubk           public key
//!     ├── <name>.privk          encrypted private key
//!     ├── <name>.simk           encrypted symmetric key
//!     └── <name>.props          encrypted properties
//! ```
//!
//! User blobs are opaque here. Encryption and key handling belong to the
//! credential layer; the store only moves bytes between peers and disk.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config;
use crate::crypto::hash::is_hex_digest;
use crate::storage::merkle::MerkleTree;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while reading or writing the persisted layout.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a Merkle artifact failed.
    #[error("merkle artifact {root}: {source}")]
    Artifact {
        root: String,
        #[source]
        source: io::Error,
    },

    /// Reading or writing a user bundle failed.
    #[error("user files for {username}: {source}")]
    User {
        username: String,
        #[source]
        source: io::Error,
    },

    /// Any other filesystem failure (directory creation, listing).
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An identifier that cannot be mapped onto the layout safely.
    #[error("invalid identifier: {0:?}")]
    InvalidName(String),

    /// Artifact bytes that do not decode to a consistent tree.
    #[error("corrupt merkle artifact {root}: {reason}")]
    CorruptArtifact { root: String, reason: String },
}

impl StoreError {
    /// True when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::Artifact { source, .. }
            | StoreError::User { source, .. }
            | StoreError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// User Bundle
// ---------------------------------------------------------------------------

/// The four blobs that make up one user record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFiles {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub symmetric_key: Vec<u8>,
    pub props: Vec<u8>,
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Handle on a node's data directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the layout under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { root: root.into() };
        for dir in [store.root.clone(), store.merkle_dir(), store.users_dir()] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir.clone(), source })?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the chain file.
    pub fn chain_path(&self) -> PathBuf {
        self.root.join(config::CHAIN_FILE_NAME)
    }

    pub fn merkle_dir(&self) -> PathBuf {
        self.root.join(config::MERKLE_DIR_NAME)
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join(config::USERS_DIR_NAME)
    }

    /// `mktrees/<root>.mkt`, after checking that `root` is a digest.
    pub fn merkle_path(&self, root: &str) -> Result<PathBuf, StoreError> {
        if !is_hex_digest(root) {
            return Err(StoreError::InvalidName(root.to_string()));
        }
        Ok(self
            .merkle_dir()
            .join(format!("{root}.{}", config::MERKLE_FILE_EXTENSION)))
    }

    fn user_dir(&self, username: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_username(username) {
            return Err(StoreError::InvalidName(username.to_string()));
        }
        Ok(self.users_dir().join(username))
    }

    // -- Merkle artifacts -------------------------------------------------

    /// Persists `tree` under its own root digest.
    pub fn save_merkle_tree(&self, tree: &MerkleTree) -> Result<(), StoreError> {
        let bytes = tree.to_bytes().map_err(|e| StoreError::CorruptArtifact {
            root: tree.root().to_string(),
            reason: e.to_string(),
        })?;
        self.write_merkle_file(tree.root(), &bytes)
    }

    /// Raw artifact bytes, as served to peers.
    pub fn read_merkle_file(&self, root: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.merkle_path(root)?;
        fs::read(path).map_err(|source| StoreError::Artifact {
            root: root.to_string(),
            source,
        })
    }

    /// Writes artifact bytes received from a peer.
    ///
    /// The bytes must decode to a self-consistent tree whose root is `root`,
    /// otherwise nothing is written.
    pub fn write_merkle_file(&self, root: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.merkle_path(root)?;
        let tree = MerkleTree::from_bytes(bytes).map_err(|e| StoreError::CorruptArtifact {
            root: root.to_string(),
            reason: e.to_string(),
        })?;
        if tree.root() != root || !tree.verify() {
            return Err(StoreError::CorruptArtifact {
                root: root.to_string(),
                reason: format!("content hashes to {}", tree.root()),
            });
        }
        write_atomically(&path, bytes).map_err(|source| StoreError::Artifact {
            root: root.to_string(),
            source,
        })?;
        debug!(root = %root, "merkle artifact written");
        Ok(())
    }

    /// Loads and decodes the artifact for `root`.
    pub fn load_merkle_tree(&self, root: &str) -> Result<MerkleTree, StoreError> {
        let bytes = self.read_merkle_file(root)?;
        MerkleTree::from_bytes(&bytes).map_err(|e| StoreError::CorruptArtifact {
            root: root.to_string(),
            reason: e.to_string(),
        })
    }

    /// Roots of every artifact present on disk.
    pub fn list_merkle_roots(&self) -> Result<BTreeSet<String>, StoreError> {
        let dir = self.merkle_dir();
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io { path: dir.clone(), source })?;

        let mut roots = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io { path: dir.clone(), source })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(config::MERKLE_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_hex_digest(stem) {
                    roots.insert(stem.to_string());
                }
            }
        }
        Ok(roots)
    }

    // -- User bundles -----------------------------------------------------

    /// Reads all four blobs for `username`.
    pub fn read_user_files(&self, username: &str) -> Result<UserFiles, StoreError> {
        let dir = self.user_dir(username)?;
        let read = |ext: &str| {
            fs::read(dir.join(format!("{username}.{ext}"))).map_err(|source| StoreError::User {
                username: username.to_string(),
                source,
            })
        };
        Ok(UserFiles {
            public_key: read(config::USER_PUBLIC_KEY_EXTENSION)?,
            private_key: read(config::USER_PRIVATE_KEY_EXTENSION)?,
            symmetric_key: read(config::USER_SYMMETRIC_KEY_EXTENSION)?,
            props: read(config::USER_PROPS_EXTENSION)?,
        })
    }

    /// Writes all four blobs for `username`, creating its directory.
    pub fn write_user_files(&self, username: &str, files: &UserFiles) -> Result<(), StoreError> {
        let dir = self.user_dir(username)?;
        let user_err = |source: io::Error| StoreError::User {
            username: username.to_string(),
            source,
        };
        fs::create_dir_all(&dir).map_err(user_err)?;

        for (ext, bytes) in [
            (config::USER_PUBLIC_KEY_EXTENSION, &files.public_key),
            (config::USER_PRIVATE_KEY_EXTENSION, &files.private_key),
            (config::USER_SYMMETRIC_KEY_EXTENSION, &files.symmetric_key),
            (config::USER_PROPS_EXTENSION, &files.props),
        ] {
            write_atomically(&dir.join(format!("{username}.{ext}")), bytes).map_err(user_err)?;
        }
        debug!(username = %username, "user files written");
        Ok(())
    }

    /// Names of every user with a complete bundle on disk.
    pub fn list_users(&self) -> Result<BTreeSet<String>, StoreError> {
        let dir = self.users_dir();
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io { path: dir.clone(), source })?;

        let mut users = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io { path: dir.clone(), source })?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_valid_username(&name) && self.has_complete_bundle(&entry.path(), &name) {
                users.insert(name);
            }
        }
        Ok(users)
    }

    fn has_complete_bundle(&self, dir: &Path, name: &str) -> bool {
        [
            config::USER_PUBLIC_KEY_EXTENSION,
            config::USER_PRIVATE_KEY_EXTENSION,
            config::USER_SYMMETRIC_KEY_EXTENSION,
            config::USER_PROPS_EXTENSION,
        ]
        .iter()
        .all(|ext| dir.join(format!("{name}.{ext}")).is_file())
    }
}

/// Usernames become directory names, so path separators and dot-names are
/// rejected.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Writes through a sibling temp file and renames it over `path`, so
/// readers never observe a half-written file.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<String> {
        vec!["alice:bsc".to_string(), "bob:msc".to_string(), "carol:phd".to_string()]
    }

    fn sample_user() -> UserFiles {
        UserFiles {
            public_key: vec![1, 2, 3],
            private_key: vec![4, 5],
            symmetric_key: vec![6],
            props: b"encrypted props".to_vec(),
        }
    }

    #[test]
    fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("node")).unwrap();
        assert!(store.merkle_dir().is_dir());
        assert!(store.users_dir().is_dir());
        assert!(store.chain_path().ends_with("bchain.bc"));
    }

    #[test]
    fn merkle_artifact_is_named_by_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let tree = MerkleTree::build(&batch());

        store.save_merkle_tree(&tree).unwrap();

        let expected = store.merkle_dir().join(format!("{}.mkt", tree.root()));
        assert!(expected.is_file());
        assert_eq!(store.load_merkle_tree(tree.root()).unwrap(), tree);
        assert!(store.list_merkle_roots().unwrap().contains(tree.root()));
    }

    #[test]
    fn artifact_with_wrong_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let tree = MerkleTree::build(&batch());
        let other = MerkleTree::build(&["x".to_string()]);

        let err = store
            .write_merkle_file(other.root(), &tree.to_bytes().unwrap())
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptArtifact { .. }));
        assert!(store.list_merkle_roots().unwrap().is_empty());
    }

    #[test]
    fn merkle_path_rejects_non_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.merkle_path("../escape"),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn missing_artifact_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let err = store.read_merkle_file(&"0".repeat(64)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn user_bundle_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.write_user_files("alice", &sample_user()).unwrap();

        let user_dir = store.users_dir().join("alice");
        for ext in ["pubk", "privk", "simk", "props"] {
            assert!(user_dir.join(format!("alice.{ext}")).is_file(), "missing .{ext}");
        }
        assert_eq!(store.read_user_files("alice").unwrap(), sample_user());
        assert_eq!(store.list_users().unwrap().into_iter().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn incomplete_user_dir_is_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let partial = store.users_dir().join("bob");
        fs::create_dir_all(&partial).unwrap();
        fs::write(partial.join("bob.pubk"), b"key").unwrap();

        assert!(store.list_users().unwrap().is_empty());
        assert!(matches!(
            store.read_user_files("bob"),
            Err(StoreError::User { .. })
        ));
    }

    #[test]
    fn usernames_cannot_escape_users_dir() {
        assert!(is_valid_username("alice"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(".."));
        assert!(!is_valid_username("a/b"));
    }
}
