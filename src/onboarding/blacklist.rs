use crate::errors::Result;
use ethers::types::Address;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const POOL_FILE: &str = "pool_blacklist.json";
pub const TOKEN_FILE: &str = "token_blacklist.json";
pub const LEGACY_TOKEN_FILE: &str = "token_erc20a.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Pool,
    Token,
    /// Tokens whose name/symbol are `bytes32`, not quarantined.
    LegacyToken,
}

impl ListKind {
    fn file_name(self) -> &'static str {
        match self {
            ListKind::Pool => POOL_FILE,
            ListKind::Token => TOKEN_FILE,
            ListKind::LegacyToken => LEGACY_TOKEN_FILE,
        }
    }
}

/// Append-only address sets, each mirrored to a JSON array file that is
/// rewritten in full on every addition.
///
/// Owned by the window-processing loop; workers never see it.
#[derive(Debug)]
pub struct Blacklist {
    dir: PathBuf,
    pools: HashSet<Address>,
    tokens: HashSet<Address>,
    legacy_tokens: HashSet<Address>,
}

impl Blacklist {
    /// Load all three sets from `dir`. A missing file is an empty set.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let bl = Self {
            pools: read_set(&dir.join(POOL_FILE))?,
            tokens: read_set(&dir.join(TOKEN_FILE))?,
            legacy_tokens: read_set(&dir.join(LEGACY_TOKEN_FILE))?,
            dir,
        };
        info!(
            pools = bl.pools.len(),
            tokens = bl.tokens.len(),
            legacy = bl.legacy_tokens.len(),
            "[BLACKLIST] loaded"
        );
        Ok(bl)
    }

    pub fn contains_pool(&self, pool: &Address) -> bool {
        self.pools.contains(pool)
    }

    pub fn contains_token(&self, token: &Address) -> bool {
        self.tokens.contains(token)
    }

    pub fn is_legacy(&self, token: &Address) -> bool {
        self.legacy_tokens.contains(token)
    }

    pub fn len(&self, kind: ListKind) -> usize {
        self.set(kind).len()
    }

    pub fn add_pool(&mut self, pool: Address) -> Result<bool> {
        self.add(ListKind::Pool, [pool])
    }

    pub fn add_token(&mut self, token: Address) -> Result<bool> {
        self.add(ListKind::Token, [token])
    }

    pub fn add_legacy(&mut self, token: Address) -> Result<bool> {
        self.add(ListKind::LegacyToken, [token])
    }

    /// Insert many addresses and flush once. Returns whether anything was new.
    pub fn add(&mut self, kind: ListKind, addresses: impl IntoIterator<Item = Address>) -> Result<bool> {
        let set = self.set_mut(kind);
        let mut added = 0usize;
        for address in addresses {
            if set.insert(address) {
                added += 1;
            }
        }
        if added == 0 {
            return Ok(false);
        }
        info!(list = ?kind, added, total = self.set(kind).len(), "[BLACKLIST] updated");
        self.flush(kind)?;
        Ok(true)
    }

    fn set(&self, kind: ListKind) -> &HashSet<Address> {
        match kind {
            ListKind::Pool => &self.pools,
            ListKind::Token => &self.tokens,
            ListKind::LegacyToken => &self.legacy_tokens,
        }
    }

    fn set_mut(&mut self, kind: ListKind) -> &mut HashSet<Address> {
        match kind {
            ListKind::Pool => &mut self.pools,
            ListKind::Token => &mut self.tokens,
            ListKind::LegacyToken => &mut self.legacy_tokens,
        }
    }

    /// Rewrite one list's file. Written to a sibling temp file first, then
    /// renamed over the target.
    pub fn flush(&self, kind: ListKind) -> Result<()> {
        let mut entries: Vec<&Address> = self.set(kind).iter().collect();
        entries.sort();
        let path = self.dir.join(kind.file_name());
        let tmp = path.with_extension("json.tmp");
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn read_set(path: &Path) -> Result<HashSet<Address>> {
    match std::fs::read(path) {
        Ok(raw) => {
            let list: Vec<Address> = serde_json::from_slice(&raw)?;
            Ok(list.into_iter().collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "[BLACKLIST] no file, starting empty");
            Ok(HashSet::new())
        }
        Err(e) => Err(e.into()),
    }
}
