use crate::store::ParseColumnError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Holder of a grant. Identity and group IDs live in separate spaces; the tag
/// travels with the ID everywhere, including the stored `i:<id>` / `g:<id>`
/// form, so identity 7 and group 7 can never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    Identity(i64),
    Group(i64),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Identity(id) => write!(f, "i:{}", id),
            Subject::Group(id) => write!(f, "g:{}", id),
        }
    }
}

impl FromStr for Subject {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseColumnError {
            kind: "subject",
            value: s.to_string(),
        };

        let (tag, id) = s.split_once(':').ok_or_else(invalid)?;
        let id: i64 = id.parse().map_err(|_| invalid())?;
        match tag {
            "i" => Ok(Subject::Identity(id)),
            "g" => Ok(Subject::Group(id)),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
