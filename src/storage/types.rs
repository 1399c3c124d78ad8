//! Core type-safe wrappers around git primitives for the storage layer.

use std::fmt;
use std::fmt::Formatter;

use chrono::{DateTime, Utc};
use git2::Oid;
use serde::{Deserialize, Serialize};

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the storage module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// Parse a CommitId from a full hex string.
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// Short form of the commit ID.
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git blob identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier. A root value's tree ID doubles as its identity hash,
/// which keys the per-session derived-table cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated table name, the case-sensitive canonical form stored in root
/// values. Reserved-prefix policy is a facade concern; the storage layer only
/// enforces identifier shape.
///
/// Valid names:
/// - 1-64 characters
/// - Alphanumeric, underscores, dollar signs
/// - Must start with a letter or underscore
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    /// Create a new TableName, validating the input.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        let first_char = name.chars().next().unwrap();
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(InvalidNameError::InvalidStart(first_char));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '$' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Case-insensitive comparison used during table resolution.
    pub fn matches_insensitive(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated row key (serialized primary key). Keys are used as filenames
/// inside a table's rows subtree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    fn validate(key: &str) -> Result<(), InvalidNameError> {
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if key.len() > 512 {
            return Err(InvalidNameError::TooLong(key.len()));
        }

        if key.starts_with('.') {
            return Err(InvalidNameError::InvalidStart('.'));
        }

        for (i, c) in key.chars().enumerate() {
            if c == '/' || c == '\0' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RowKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    /// The default branch name.
    pub const MAIN: &'static str = "main";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// Full ref path (e.g., "refs/heads/main").
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagName(String);

impl TagName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn as_ref_path(&self) -> String {
        format!("refs/tags/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tagged reference into the commit graph. `Working` and `Staged` are
/// per-session pseudo-refs and are resolved against session state by the
/// caller, never by the graph itself. The `AS OF` time axis is not a ref:
/// timestamp resolution goes through [`CommitGraph::as_of_time`] so that
/// "no commit at or before t" stays a non-error result.
///
/// [`CommitGraph::as_of_time`]: crate::storage::CommitGraph::as_of_time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSpec {
    Branch(BranchName),
    Tag(TagName),
    /// A remote-tracking branch, e.g. "origin/main".
    Remote(String),
    Head,
    Working,
    Staged,
    /// A full or abbreviated commit hash.
    Hash(String),
}

impl RefSpec {
    /// Parse a revision string into a RefSpec. Hex-looking strings of at
    /// least 4 characters are treated as hash prefixes; everything else is a
    /// branch name.
    pub fn parse(s: &str) -> Result<Self, InvalidNameError> {
        match s {
            "HEAD" => return Ok(RefSpec::Head),
            _ if s.eq_ignore_ascii_case("working") => return Ok(RefSpec::Working),
            _ if s.eq_ignore_ascii_case("staged") => return Ok(RefSpec::Staged),
            _ => {}
        }

        if s.contains('/') {
            return Ok(RefSpec::Remote(s.to_string()));
        }

        if s.len() >= 4 && s.len() <= 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(RefSpec::Hash(s.to_string()));
        }

        Ok(RefSpec::Branch(BranchName::new(s)?))
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefSpec::Branch(b) => write!(f, "{}", b),
            RefSpec::Tag(t) => write!(f, "{}", t),
            RefSpec::Remote(r) => write!(f, "{}", r),
            RefSpec::Head => write!(f, "HEAD"),
            RefSpec::Working => write!(f, "WORKING"),
            RefSpec::Staged => write!(f, "STAGED"),
            RefSpec::Hash(h) => write!(f, "{}", h),
        }
    }
}

/// Author/committer info attached to commits.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Default signature for internal operations.
    pub fn system() -> Self {
        Self::new("branchdb", "branchdb@localhost")
    }

    pub(crate) fn to_git2_at(
        &self,
        time: DateTime<Utc>,
    ) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::new(
            &self.name,
            &self.email,
            &git2::Time::new(time.timestamp(), 0),
        )
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::system()
    }
}

/// Error type for invalid names (tables, rows, branches, tags).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidStart(char),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidStart(c) => write!(f, "name cannot start with '{}'", c),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_valid() {
        assert!(TableName::new("users").is_ok());
        assert!(TableName::new("user_accounts").is_ok());
        assert!(TableName::new("User123").is_ok());
        assert!(TableName::new("_private").is_ok());
        assert!(TableName::new("dolt_schemas").is_ok());
    }

    #[test]
    fn test_table_name_invalid() {
        assert!(TableName::new("").is_err());
        assert!(TableName::new("123users").is_err());
        assert!(TableName::new("users/admin").is_err());
        assert!(TableName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_table_name_insensitive_match() {
        let name = TableName::new("Users").unwrap();
        assert!(name.matches_insensitive("USERS"));
        assert!(name.matches_insensitive("users"));
        assert!(!name.matches_insensitive("user"));
    }

    #[test]
    fn test_ref_spec_parse() {
        assert_eq!(RefSpec::parse("HEAD").unwrap(), RefSpec::Head);
        assert_eq!(RefSpec::parse("WORKING").unwrap(), RefSpec::Working);
        assert_eq!(RefSpec::parse("staged").unwrap(), RefSpec::Staged);
        assert!(matches!(
            RefSpec::parse("deadbeef").unwrap(),
            RefSpec::Hash(_)
        ));
        assert!(matches!(
            RefSpec::parse("feature-x").unwrap(),
            RefSpec::Branch(_)
        ));
        assert!(matches!(RefSpec::parse("main").unwrap(), RefSpec::Branch(_)));
        assert!(matches!(
            RefSpec::parse("origin/main").unwrap(),
            RefSpec::Remote(_)
        ));
    }

    #[test]
    fn test_branch_name_refpath() {
        let branch = BranchName::main();
        assert_eq!(branch.as_ref_path(), "refs/heads/main");
    }
}
