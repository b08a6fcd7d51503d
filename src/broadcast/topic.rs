//! Fixed set of routing keys a dashboard connection can subscribe to.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::BroadcastError;

/// A broadcast channel name.
///
/// Topics are not persisted; they only decide which connections an
/// [`Envelope`](super::Envelope) is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Sessions,
    Intelligence,
    Terminal,
    Stats,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Sessions,
        Topic::Intelligence,
        Topic::Terminal,
        Topic::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Sessions => "sessions",
            Topic::Intelligence => "intelligence",
            Topic::Terminal => "terminal",
            Topic::Stats => "stats",
        }
    }

    /// Dense index used by per-topic lanes in the router.
    pub(crate) fn index(&self) -> usize {
        match self {
            Topic::Sessions => 0,
            Topic::Intelligence => 1,
            Topic::Terminal => 2,
            Topic::Stats => 3,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = BroadcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sessions" => Ok(Topic::Sessions),
            "intelligence" => Ok(Topic::Intelligence),
            "terminal" => Ok(Topic::Terminal),
            "stats" => Ok(Topic::Stats),
            other => Err(BroadcastError::InvalidTopic(vec![other.to_string()])),
        }
    }
}

/// Splits client-supplied names into recognised topics and rejected names.
///
/// Duplicates collapse; the order of rejected names is preserved so error
/// messages echo what the client sent.
pub fn parse_topics<S: AsRef<str>>(names: &[S]) -> (BTreeSet<Topic>, Vec<String>) {
    let mut valid = BTreeSet::new();
    let mut rejected = Vec::new();
    for name in names {
        match name.as_ref().parse::<Topic>() {
            Ok(topic) => {
                valid.insert(topic);
            }
            Err(_) => rejected.push(name.as_ref().to_string()),
        }
    }
    (valid, rejected)
}
