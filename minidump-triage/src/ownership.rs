//! Who is responsible for which filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Filter, FilterError};

/// A person or team, identified by the display name the tracker knows them by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    pub fn new(name: impl Into<String>) -> Owner {
        Owner(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One filter bound to the owner of the failures it catches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipData {
    pub filter: Filter,
    pub owner: Owner,
}

impl OwnershipData {
    pub fn new(filter: Filter, owner: Owner) -> OwnershipData {
        OwnershipData { filter, owner }
    }
}

/// `FIELD:RULE:VALUE=OWNER`, the command line form of an entry.
impl FromStr for OwnershipData {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (filter, owner) = s
            .rsplit_once('=')
            .filter(|(_, owner)| !owner.trim().is_empty())
            .ok_or_else(|| FilterError::Malformed(s.to_owned()))?;
        Ok(OwnershipData::new(filter.parse()?, Owner::new(owner.trim())))
    }
}

impl AsRef<Filter> for OwnershipData {
    fn as_ref(&self) -> &Filter {
        &self.filter
    }
}

/// The ordered list of ownership entries plus the owner of everything else.
///
/// Entry order doubles as filter priority for the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTable {
    #[serde(rename = "rules", default)]
    entries: Vec<OwnershipData>,
    default_owner: Owner,
}

impl OwnershipTable {
    pub fn new(entries: Vec<OwnershipData>, default_owner: Owner) -> OwnershipTable {
        OwnershipTable {
            entries,
            default_owner,
        }
    }

    pub fn entries(&self) -> &[OwnershipData] {
        &self.entries
    }

    pub fn default_owner(&self) -> &Owner {
        &self.default_owner
    }

    /// The owner bound to `filter`, if any entry uses an equal filter.
    ///
    /// When a filter appears twice the first entry wins.
    pub fn lookup(&self, filter: &Filter) -> Option<&Owner> {
        self.entries
            .iter()
            .find(|entry| entry.filter == *filter)
            .map(|entry| &entry.owner)
    }

    /// The owner bound to `filter`, falling back to the default owner.
    pub fn owner_for(&self, filter: &Filter) -> &Owner {
        self.lookup(filter).unwrap_or(&self.default_owner)
    }

    /// Filters that are shadowed by an earlier entry with an equal filter.
    pub fn duplicates(&self) -> Vec<&OwnershipData> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, entry)| self.entries[..*i].iter().any(|e| e.filter == entry.filter))
            .map(|(_, entry)| entry)
            .collect()
    }

    pub(crate) fn warn_duplicates(&self) {
        for shadowed in self.duplicates() {
            warn!(
                "rule {} for {} is shadowed by an earlier rule with the same filter",
                shadowed.filter, shadowed.owner
            );
        }
    }
}
