//! UID/GID mapping records
//!
//! Mappings are given as `inside:outside:count` triples and written to
//! `/proc/<pid>/{uid,gid}_map` as newline separated `inside outside count`
//! lines.

use std::fmt;
use std::str::FromStr;

use isolate_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which id space a mapping applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    /// User ids
    User,
    /// Group ids
    Group,
}

impl IdKind {
    /// procfs control file holding the mapping
    #[must_use]
    pub const fn map_file(self) -> &'static str {
        match self {
            Self::User => "uid_map",
            Self::Group => "gid_map",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Group => "group",
        })
    }
}

/// One mapping entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMap {
    /// First id inside the namespace
    pub inside: u32,
    /// First id outside the namespace
    pub outside: u32,
    /// Number of consecutive ids mapped
    pub count: u32,
}

impl FromStr for IdMap {
    type Err = Error;

    fn from_str(record: &str) -> Result<Self> {
        let invalid = || Error::config(format!("invalid id mapping: {record:?}"));

        let mut fields = record.split(':').map(|field| parse_id(field).ok_or_else(invalid));
        let (Some(inside), Some(outside), Some(count), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid());
        };

        Ok(Self {
            inside: inside?,
            outside: outside?,
            count: count?,
        })
    }
}

impl fmt::Display for IdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.inside, self.outside, self.count)
    }
}

fn parse_id(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Ordered list of mapping entries for one id space
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMapping {
    entries: Vec<IdMap>,
}

impl IdMapping {
    /// Create an empty mapping
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Mapping of a single id
    #[must_use]
    pub fn single(inside: u32, outside: u32) -> Self {
        Self {
            entries: vec![IdMap {
                inside,
                outside,
                count: 1,
            }],
        }
    }

    /// Append comma separated `inside:outside:count` records
    ///
    /// Nothing is appended unless every record is valid.
    ///
    /// ```
    /// use isolate_namespace::IdMapping;
    ///
    /// let mut mapping = IdMapping::new();
    /// mapping.parse_append("0:1000:1").unwrap();
    /// mapping.parse_append("1:100000:65536").unwrap();
    /// assert_eq!(mapping.to_string(), "0 1000 1\n1 100000 65536");
    /// ```
    ///
    /// # Errors
    /// Returns a configuration error for a malformed record
    pub fn parse_append(&mut self, records: &str) -> Result<()> {
        let parsed = records
            .split(',')
            .filter(|record| !record.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<IdMap>>>()?;

        if parsed.is_empty() {
            return Err(Error::config(format!("empty id mapping: {records:?}")));
        }

        self.entries.extend(parsed);
        Ok(())
    }

    /// Mapping entries
    #[must_use]
    pub fn entries(&self) -> &[IdMap] {
        &self.entries
    }

    /// Check if no entry was given
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}
