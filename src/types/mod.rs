#![forbid(unsafe_code)]

//! Identifiers and the error type shared across the log index.

use std::convert::TryFrom;
use std::fmt;

/// Log sequence number of a redo record. Also used as the version marker
/// under which consolidated page images are stored.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// No consolidated image exists yet.
    pub const ZERO: Lsn = Lsn(0);
    /// Reserved marker for the first consolidated image of a page.
    pub const SENTINEL: Lsn = Lsn(1);

    /// Returns true for the markers that can never name a redo record.
    pub const fn is_reserved(self) -> bool {
        self.0 <= Self::SENTINEL.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl From<Lsn> for u64 {
    fn from(value: Lsn) -> Self {
        value.0
    }
}

/// Physical fork of a relation a page belongs to.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ForkNumber {
    /// Main data fork.
    Main = 0,
    /// Free space map.
    Fsm = 1,
    /// Visibility map.
    VisibilityMap = 2,
    /// Init fork for unlogged relations.
    Init = 3,
}

impl ForkNumber {
    /// Returns the on-wire discriminant.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ForkNumber {
    type Error = LogIndexError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ForkNumber::Main),
            1 => Ok(ForkNumber::Fsm),
            2 => Ok(ForkNumber::VisibilityMap),
            3 => Ok(ForkNumber::Init),
            _ => Err(LogIndexError::Corruption("unknown fork number")),
        }
    }
}

/// Length of [`PageKey::to_bytes`].
pub const PAGE_KEY_LEN: usize = 17;

/// Identity of one logical page: tablespace, database, relation, fork, block.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageKey {
    /// Tablespace oid.
    pub spc: u32,
    /// Database oid.
    pub db: u32,
    /// Relation file node.
    pub rel: u32,
    /// Relation fork.
    pub fork: ForkNumber,
    /// Block number within the fork.
    pub block: u32,
}

impl PageKey {
    /// Builds a key for a main-fork page.
    pub const fn main(spc: u32, db: u32, rel: u32, block: u32) -> Self {
        Self {
            spc,
            db,
            rel,
            fork: ForkNumber::Main,
            block,
        }
    }

    /// Fixed big-endian encoding used for hashing and store keys.
    pub fn to_bytes(&self) -> [u8; PAGE_KEY_LEN] {
        let mut buf = [0u8; PAGE_KEY_LEN];
        buf[0..4].copy_from_slice(&self.spc.to_be_bytes());
        buf[4..8].copy_from_slice(&self.db.to_be_bytes());
        buf[8..12].copy_from_slice(&self.rel.to_be_bytes());
        buf[12] = self.fork.as_u8();
        buf[13..17].copy_from_slice(&self.block.to_be_bytes());
        buf
    }

    /// Decodes the output of [`PageKey::to_bytes`].
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        if src.len() != PAGE_KEY_LEN {
            return Err(LogIndexError::Corruption("page key length mismatch"));
        }
        let word = |at: usize| u32::from_be_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]);
        Ok(Self {
            spc: word(0),
            db: word(4),
            rel: word(8),
            fork: ForkNumber::try_from(src[12])?,
            block: word(13),
        })
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.spc,
            self.db,
            self.rel,
            self.fork.as_u8(),
            self.block
        )
    }
}

/// Errors surfaced by the log index and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum LogIndexError {
    /// Underlying I/O failure, usually from the version store.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted or in-memory state failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the index refuses.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The consolidated image recorded for a page is absent from the store.
    #[error("no image for page {key} at marker {marker}")]
    MissingImage {
        /// Page whose image is missing.
        key: PageKey,
        /// Marker the head claims is persisted.
        marker: Lsn,
    },
    /// The redo engine could not produce an image.
    #[error("redo: {0}")]
    Redo(String),
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LogIndexError>;
