//! Domain names, labels, and name filters.

use std::{
    cmp::Ordering,
    fmt::{self, Write},
    hash::{Hash, Hasher},
    slice,
    str::FromStr,
};

use super::Error;

/// A `.`-separated component of a [`DomainName`].
///
/// Labels consist of arbitrary bytes and have a maximum length of 63 bytes. This type can only
/// represent non-empty labels, so the minimum length is 1 byte.
///
/// Comparison, ordering and hashing are ASCII case-insensitive, as DNS requires.
#[derive(Clone)]
pub struct Label {
    // Guaranteed to contain >0 and at most `Label::MAX_LEN` bytes.
    bytes: Box<[u8]>,
}

impl Label {
    /// The maximum length of a domain label.
    pub const MAX_LEN: usize = 0b0011_1111;

    /// Creates a [`Label`] from raw bytes or a string slice, panicking if the bytes are an invalid
    /// label.
    ///
    /// # Panics
    ///
    /// This function will panic if `bytes` is empty or contains more than [`Self::MAX_LEN`] bytes.
    pub fn new(label: impl AsRef<[u8]>) -> Self {
        let label = label.as_ref();
        Self::try_new(label)
            .unwrap_or_else(|_| panic!("`Label::new` called with invalid data: {:?}", label))
    }

    /// Creates a [`Label`] from raw bytes or a string slice, returning an error if the bytes are
    /// an invalid label.
    pub fn try_new(label: impl AsRef<[u8]>) -> Result<Self, Error> {
        let label = label.as_ref();
        if label.is_empty() {
            return Err(Error::InvalidEmptyLabel);
        }

        if label.len() > Self::MAX_LEN {
            return Err(Error::LabelTooLong);
        }

        Ok(Self {
            bytes: label.into(),
        })
    }

    /// Returns the raw bytes of this label.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.bytes.iter().map(u8::to_ascii_lowercase)
    }
}

impl PartialEq for Label {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.bytes.eq_ignore_ascii_case(&other.bytes)
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.bytes.len());
        for b in self.folded() {
            state.write_u8(b);
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#""{}""#, self.as_bytes().escape_ascii())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_bytes().escape_ascii().fmt(f)
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

/// A fully-qualified domain name, represented as a list of [`Label`]s.
///
/// On the wire, domain names are terminated by an empty label; this type omits that label.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct DomainName {
    // Does not include the trailing empty label.
    labels: Vec<Label>,
}

impl DomainName {
    /// The empty root domain `.`.
    pub const ROOT: Self = Self { labels: Vec::new() };

    /// Parses a domain name as a string of `.`-separated labels.
    ///
    /// A trailing `.` is allowed but not required.
    pub fn from_str(s: &str) -> Result<Self, Error> {
        s.parse()
    }

    /// Returns the `.`-separated labels making up this domain name.
    #[inline]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Appends a [`Label`] to the end of this domain name.
    #[inline]
    pub fn push_label(&mut self, label: Label) {
        self.labels.push(label);
    }

    /// Returns a new name consisting of `self` followed by every label of `suffix`.
    pub fn join(&self, suffix: &DomainName) -> DomainName {
        let mut labels = self.labels.clone();
        labels.extend(suffix.labels.iter().cloned());
        DomainName { labels }
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Label> {
        self.labels.iter()
    }
}

impl FromIterator<Label> for DomainName {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self {
            labels: Vec::from_iter(iter),
        }
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_char('.');
        }
        for label in &self.labels {
            label.fmt(f)?;
            f.write_char('.')?;
        }
        Ok(())
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for DomainName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "." {
            // `split_terminator` returns an empty label for this, so special-case it
            return Ok(Self::ROOT);
        }

        s.split_terminator('.').map(str::parse::<Label>).collect()
    }
}

/// The name half of a subscription or cache lookup: either every name, or one exact name.
///
/// Parsing the string `"*"` yields [`NameFilter::Any`]. The wildcard is never the name of a
/// stored record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum NameFilter {
    Any,
    Exact(DomainName),
}

impl NameFilter {
    pub fn matches(&self, name: &DomainName) -> bool {
        match self {
            NameFilter::Any => true,
            NameFilter::Exact(n) => n == name,
        }
    }
}

impl From<DomainName> for NameFilter {
    fn from(name: DomainName) -> Self {
        NameFilter::Exact(name)
    }
}

impl FromStr for NameFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            Ok(NameFilter::Any)
        } else {
            s.parse().map(NameFilter::Exact)
        }
    }
}

impl fmt::Display for NameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameFilter::Any => f.write_char('*'),
            NameFilter::Exact(name) => name.fmt(f),
        }
    }
}

impl fmt::Debug for NameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(name: &DomainName) -> u64 {
        let mut h = DefaultHasher::new();
        name.hash(&mut h);
        h.finish()
    }

    #[test]
    fn display_label() {
        assert_eq!(format!(" {} ", Label::new("\0")), r#" \x00 "#);
        assert_eq!(format!(" {} ", Label::new("a")), r#" a "#);
        assert_eq!(format!(" {:?} ", Label::new("\n")), r#" "\n" "#);
    }

    #[test]
    fn domain_name_string_conversion() {
        assert_eq!("..".parse::<DomainName>(), Err(Error::InvalidEmptyLabel));
        assert_eq!(".local".parse::<DomainName>(), Err(Error::InvalidEmptyLabel));
        assert_eq!(".".parse::<DomainName>(), Ok(DomainName::ROOT));
        assert_eq!("local.".parse::<DomainName>().unwrap().to_string(), "local.");
        assert_eq!("local".parse::<DomainName>().unwrap().to_string(), "local.");
        assert_eq!(
            "Sam Roberts._http._tcp.local."
                .parse::<DomainName>()
                .unwrap()
                .labels()
                .len(),
            4
        );
    }

    #[test]
    fn names_compare_case_insensitively() {
        let a = DomainName::from_str("Ensemble.LOCAL.").unwrap();
        let b = DomainName::from_str("ensemble.local.").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(hash_of(&a), hash_of(&b));
        // display keeps the original spelling
        assert_eq!(a.to_string(), "Ensemble.LOCAL.");
    }

    #[test]
    fn join() {
        let ty = DomainName::from_str("_http._tcp").unwrap();
        let local = DomainName::from_str("local.").unwrap();
        assert_eq!(ty.join(&local).to_string(), "_http._tcp.local.");
    }

    #[test]
    fn name_filter() {
        let any: NameFilter = "*".parse().unwrap();
        assert_eq!(any, NameFilter::Any);
        let foo: NameFilter = "foo.local.".parse().unwrap();
        let foo_name = DomainName::from_str("foo.local").unwrap();
        let bar_name = DomainName::from_str("bar.local").unwrap();
        assert!(any.matches(&bar_name));
        assert!(foo.matches(&foo_name));
        assert!(!foo.matches(&bar_name));
        assert_eq!(foo.to_string(), "foo.local.");
        assert_eq!(any.to_string(), "*");
    }
}
