//! Paths and entry names.
//!
//! Callers speak UTF-8; directory entries store names as 32 UTF-16 code
//! units, NUL-padded. Sibling order is by code-unit length first, then
//! lexicographic, which is the order the directory trees are keyed by.

use crate::{Error, Result};

/// A directory entry name: 32 UTF-16 code units, NUL-padded.
pub type Name = [u16; 32];

/// Maximum name length in code units (one unit is kept for the NUL).
pub const MAX_NAME_UNITS: usize = 31;

/// Encodes a UTF-8 component into a stored name.
pub fn name_from_str(s: &str) -> Result<Name> {
    if s.is_empty() {
        return Err(Error::InvalidArgument("empty name"));
    }

    let mut name: Name = [0; 32];
    let mut n = 0;
    for unit in s.encode_utf16() {
        if n >= MAX_NAME_UNITS {
            return Err(Error::InvalidArgument("name longer than 31 code units"));
        }
        name[n] = unit;
        n += 1;
    }
    Ok(name)
}

/// Decodes a stored name back into UTF-8, lossily for broken surrogates.
#[must_use]
pub fn name_to_string(name: &Name) -> String {
    let len = name_len(name);
    String::from_utf16_lossy(&name[..len])
}

/// Number of code units before the first NUL.
#[must_use]
pub fn name_len(name: &Name) -> usize {
    name.iter().position(|u| *u == 0).unwrap_or(name.len())
}

/// Sibling ordering: length first, then code-unit lexicographic.
#[must_use]
pub fn name_less(a: &Name, b: &Name) -> bool {
    let la = name_len(a);
    let lb = name_len(b);
    if la != lb {
        return la < lb;
    }
    a[..la] < b[..lb]
}

/// A path: a list of names from the root.
///
/// The empty path designates the root storage itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FsPath {
    components: Vec<String>,
}

impl FsPath {
    /// The root path.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Path components, outermost first.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Splits into the parent components and the final name.
    #[must_use]
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        let (last, parent) = self.components.split_last()?;
        Some((parent, last))
    }

    /// Appends a component.
    pub fn push<S: Into<String>>(&mut self, component: S) {
        self.components.push(component.into());
    }

    /// The path of this path's parent; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (parent, _) = self.split_last()?;
        Some(Self {
            components: parent.to_vec(),
        })
    }
}

impl From<&str> for FsPath {
    fn from(value: &str) -> Self {
        Self {
            components: value
                .split('/')
                .filter(|c| !c.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
        }
    }
}

impl From<&[&str]> for FsPath {
    fn from(value: &[&str]) -> Self {
        Self {
            components: value.iter().map(|c| (*c).to_owned()).collect(),
        }
    }
}

impl<const N: usize> From<[&str; N]> for FsPath {
    fn from(value: [&str; N]) -> Self {
        value.as_slice().into()
    }
}

impl std::fmt::Display for FsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{name_from_str, name_less, name_to_string, FsPath};
    use test_log::test;

    #[test]
    fn name_round_trip() {
        let name = name_from_str("hello").unwrap();
        assert_eq!("hello", name_to_string(&name));
        assert_eq!(0, name[5]);
    }

    #[test]
    fn name_length_limit() {
        assert!(name_from_str(&"x".repeat(31)).is_ok());
        assert!(name_from_str(&"x".repeat(32)).is_err());
        assert!(name_from_str("").is_err());
    }

    #[test]
    fn shorter_names_order_first() {
        let aa = name_from_str("aa").unwrap();
        let b = name_from_str("b").unwrap();
        let z = name_from_str("z").unwrap();

        // "b" < "z" < "aa": length dominates
        assert!(name_less(&b, &z));
        assert!(name_less(&z, &aa));
        assert!(!name_less(&aa, &b));
    }

    #[test]
    fn path_parsing() {
        let path = FsPath::from("hello/world");
        assert_eq!(2, path.components().len());
        assert_eq!("/hello/world", path.to_string());

        let (parent, leaf) = path.split_last().unwrap();
        assert_eq!(["hello".to_owned()], parent);
        assert_eq!("world", leaf);

        assert!(FsPath::from("").is_root());
        assert!(FsPath::from("/").is_root());
    }
}
