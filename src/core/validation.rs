//! Validation for `name;cycle` object specifications
//!
//! Objects in a directory are addressed by name, optionally followed by a
//! semicolon and a cycle number selecting one of several keys sharing that
//! name.

use crate::error::{Result, RootError};
use std::fmt;

/// Cycle value that, like an empty cycle, selects the latest key
pub const LATEST_CYCLE: i16 = 9999;

/// A validated `name[;cycle]` specification
///
/// # Rules
/// - The name must not be empty or `*`
/// - The cycle, when present, must be an integer; `*` is rejected
/// - An empty cycle or [`LATEST_CYCLE`] selects the highest cycle
///
/// # Examples
///
/// ```
/// use rootio::validation::NameCycle;
///
/// let nc = NameCycle::new("hpx;2").unwrap();
/// assert_eq!(nc.name(), "hpx");
/// assert_eq!(nc.cycle(), Some(2));
///
/// assert_eq!(NameCycle::new("hpx").unwrap().cycle(), None);
/// assert_eq!(NameCycle::new("hpx;9999").unwrap().cycle(), None);
/// assert!(NameCycle::new("hpx;*").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameCycle {
    name: String,
    cycle: Option<i16>,
}

impl NameCycle {
    pub fn new(spec: &str) -> Result<Self> {
        let invalid = || RootError::InvalidNameCycle(spec.to_string());

        let (name, cycle) = match spec.split_once(';') {
            Some((name, cycle)) => (name, cycle.trim()),
            None => (spec, ""),
        };

        if name.is_empty() || name == "*" {
            return Err(invalid());
        }

        let cycle = match cycle {
            "" => None,
            c => match c.parse::<i16>() {
                Ok(LATEST_CYCLE) => None,
                Ok(n) => Some(n),
                Err(_) => return Err(invalid()),
            },
        };

        Ok(NameCycle {
            name: name.to_string(),
            cycle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested cycle; `None` means the latest one
    pub fn cycle(&self) -> Option<i16> {
        self.cycle
    }
}

impl fmt::Display for NameCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cycle {
            Some(c) => write!(f, "{};{}", self.name, c),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_specs() {
        let nc = NameCycle::new("missing;1").unwrap();
        assert_eq!((nc.name(), nc.cycle()), ("missing", Some(1)));

        let nc = NameCycle::new("tree;").unwrap();
        assert_eq!((nc.name(), nc.cycle()), ("tree", None));

        let nc = NameCycle::new("tree;9999").unwrap();
        assert_eq!(nc.cycle(), None);
        assert_eq!(nc.to_string(), "tree");

        assert_eq!(NameCycle::new("a;12").unwrap().to_string(), "a;12");
    }

    #[test]
    fn test_invalid_specs() {
        let invalid = ["", "*", "*;1", ";1", "h;*", "h;one", "h;99999"];
        for spec in invalid {
            assert!(
                matches!(NameCycle::new(spec), Err(RootError::InvalidNameCycle(_))),
                "{:?} should be rejected",
                spec
            );
        }
    }
}
