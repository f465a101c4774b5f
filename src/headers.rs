//! Case-insensitive multi-valued header storage.
//!
//! Names are normalized to lowercase on insertion and must be RFC 9110
//! tokens; values must not contain CR, LF, or NUL (prevents header
//! injection). Keys keep first-insertion order internally (`raw`), while
//! iteration yields keys in ascending sort order with values comma-joined
//! in append order.

use crate::error::{ErrorKind, FetchError, Result};

/// Ordered, case-insensitive header multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    // Lowercased key -> append-ordered values, in first-insertion order.
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, preserving any existing values for the name.
    pub fn append(&mut self, name: &str, value: &str) -> Result<()> {
        let key = validate_name(name)?;
        validate_value(name, value)?;
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.to_owned()),
            None => self.entries.push((key, vec![value.to_owned()])),
        }
        Ok(())
    }

    /// Replace all values for the name with a single value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let key = validate_name(name)?;
        validate_value(name, value)?;
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => {
                values.clear();
                values.push(value.to_owned());
            }
            None => self.entries.push((key, vec![value.to_owned()])),
        }
        Ok(())
    }

    /// Get the value for a name, comma-joining multiple values.
    ///
    /// For `set-cookie` this join is lossy; use [`Headers::get_all`].
    pub fn get(&self, name: &str) -> Option<String> {
        let key = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, values)| values.join(", "))
    }

    /// Get the raw value sequence for `set-cookie`.
    ///
    /// Any other name fails: for every other header the comma-joined
    /// [`Headers::get`] is the defined accessor.
    pub fn get_all(&self, name: &str) -> Result<Vec<String>> {
        if !name.eq_ignore_ascii_case("set-cookie") {
            return Err(FetchError::new(
                ErrorKind::Type,
                "getAll can only be used with Set-Cookie",
            ));
        }
        Ok(self
            .entries
            .iter()
            .find(|(k, _)| k == "set-cookie")
            .map(|(_, values)| values.clone())
            .unwrap_or_default())
    }

    /// Whether any value exists for the name.
    pub fn has(&self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Remove all values for the name.
    pub fn delete(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != key);
    }

    /// The full mapping (lowercased key -> value sequence) in
    /// first-insertion order. Used by the wire framing layer.
    pub fn raw(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, joined-value)` pairs with names in ascending sort
    /// order. Names are already lowercase, so the sort is effectively
    /// case-insensitive.
    pub fn iter(&self) -> impl Iterator<Item = (String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(k, values)| (k.clone(), values.join(", ")))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.into_iter()
    }

    /// Iterate names in ascending sort order.
    pub fn keys(&self) -> impl Iterator<Item = String> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterate joined values, ordered by their names' sort order.
    pub fn values(&self) -> impl Iterator<Item = String> {
        self.iter().map(|(_, v)| v)
    }

    /// Build a header set from wire pairs received off a transport.
    ///
    /// Same grammar as [`Headers::append`], but violations are a
    /// transport fault (`System`), not caller misuse.
    pub(crate) fn from_wire<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name, value).map_err(|e| {
                FetchError::new(ErrorKind::System, format!("malformed response headers: {e}"))
            })?;
        }
        Ok(headers)
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        let pairs: Vec<_> = self.iter().collect();
        pairs.into_iter()
    }
}

impl TryFrom<&[(&str, &str)]> for Headers {
    type Error = FetchError;

    fn try_from(pairs: &[(&str, &str)]) -> Result<Self> {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name, value)?;
        }
        Ok(headers)
    }
}

/// Validate a header name per RFC 9110 Section 5.1, returning the
/// lowercased key.
fn validate_name(name: &str) -> Result<String> {
    if name.is_empty() || !name.bytes().all(is_tchar) {
        return Err(FetchError::new(
            ErrorKind::Type,
            format!("{name} is not a legal HTTP header name"),
        ));
    }
    Ok(name.to_ascii_lowercase())
}

/// Check if a byte is a valid token character per RFC 9110.
fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Validate a header value per RFC 9110 Section 5.5: no NUL, CR, or LF.
fn validate_value(name: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(FetchError::new(
            ErrorKind::Type,
            format!("{name} has an invalid header value"),
        ));
    }
    Ok(())
}
