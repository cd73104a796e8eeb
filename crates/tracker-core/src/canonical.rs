//! Path canonicalization shared by the control path and the interception path.
//!
//! A [`CanonicalPath`] is an absolute, lexically normalized path. Comparison is
//! case-insensitive. Normalization never touches the filesystem: symbolic
//! links and hard links are not followed, so the same file reached through two
//! different names yields two different canonical paths. Such a pair simply
//! does not match.

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Longest canonical path accepted, in bytes. One byte of the wire record's
/// path field is reserved for the terminator.
pub const MAX_PATH_LEN: usize = crate::record::FILE_PATH_FIELD - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),
    #[error("path contains a NUL byte")]
    InteriorNul,
    #[error("path is not valid UTF-8")]
    NotUtf8,
}

/// Absolute, normalized path used as the registry's comparison key.
#[derive(Clone)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive equality.
    pub fn matches(&self, other: &CanonicalPath) -> bool {
        eq_ignore_case(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for CanonicalPath {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for CanonicalPath {}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonicalPath({:?})", self.0)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Uppercase form of `c` when it is a single character, otherwise `c`.
///
/// Characters whose uppercase expands (`ß` to `SS`, `ﬁ` to `FI`) compare as
/// themselves, so one character never matches two.
pub fn simple_uppercase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Case-insensitive comparison using the simple uppercase mapping. Both sides
/// must have the same number of characters. Does not allocate.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }
    a.chars()
        .map(simple_uppercase)
        .eq(b.chars().map(simple_uppercase))
}

/// Canonicalize an absolute path.
pub fn canonicalize(input: &str) -> Result<CanonicalPath, PathError> {
    if input.is_empty() {
        return Err(PathError::Empty);
    }
    if input.contains('\0') {
        return Err(PathError::InteriorNul);
    }
    if !input.starts_with('/') {
        return Err(PathError::NotAbsolute(input.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in input.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(input.len());
    if segments.is_empty() {
        out.push('/');
    }
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }

    if out.len() > MAX_PATH_LEN {
        return Err(PathError::TooLong {
            len: out.len(),
            max: MAX_PATH_LEN,
        });
    }
    Ok(CanonicalPath(out))
}

/// Canonicalize `input`, resolving it against `base` when it is relative.
pub fn canonicalize_with_base(input: &Path, base: &Path) -> Result<CanonicalPath, PathError> {
    if input.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    let joined;
    let full = if input.has_root() {
        input
    } else {
        joined = base.join(input);
        joined.as_path()
    };
    canonicalize_path(full)
}

/// Canonicalize a filesystem path.
pub fn canonicalize_path(path: &Path) -> Result<CanonicalPath, PathError> {
    let s = path.to_str().ok_or(PathError::NotUtf8)?;
    canonicalize(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_dots() {
        let p = canonicalize("/watched//./dir/../a.txt/").unwrap();
        assert_eq!(p.as_str(), "/watched/a.txt");
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(canonicalize("/../..").unwrap().as_str(), "/");
        assert_eq!(canonicalize("/../x").unwrap().as_str(), "/x");
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(canonicalize(""), Err(PathError::Empty));
        assert_eq!(canonicalize("/a\0b"), Err(PathError::InteriorNul));
        assert!(matches!(
            canonicalize("watched/a.txt"),
            Err(PathError::NotAbsolute(_))
        ));
        let long = format!("/{}", "x".repeat(MAX_PATH_LEN));
        assert!(matches!(canonicalize(&long), Err(PathError::TooLong { .. })));
    }

    #[test]
    fn case_insensitive_equality() {
        let a = canonicalize("/Watched/A.TXT").unwrap();
        let b = canonicalize("/watched/a.txt").unwrap();
        assert!(a.matches(&b));
        assert_eq!(a, b);
        assert!(eq_ignore_case("/daten/ÄRGER", "/DATEN/ärger"));
        assert!(!eq_ignore_case("/a/b", "/a/c"));
    }

    #[test]
    fn expanding_uppercase_does_not_merge_names() {
        let sharp = canonicalize("/x/straße.txt").unwrap();
        let double = canonicalize("/x/strasse.txt").unwrap();
        assert_ne!(sharp, double);
        assert!(!eq_ignore_case("/x/STRASSE.TXT", "/x/straße.txt"));
        assert!(!eq_ignore_case("/x/ﬁle", "/x/file"));
        assert!(!eq_ignore_case("/x/ﬁle", "/x/FILE"));
        assert!(eq_ignore_case("/x/ﬁle", "/x/ﬁle"));
        assert!(eq_ignore_case("/x/Straße.txt", "/X/STRAßE.TXT"));
        assert!(eq_ignore_case("/x/ä", "/X/Ä"));
        assert_eq!(simple_uppercase('ß'), 'ß');
        assert_eq!(simple_uppercase('ä'), 'Ä');
    }

    #[test]
    fn relative_input_resolves_against_base() {
        let p = canonicalize_with_base(Path::new("../b.txt"), Path::new("/watched/sub")).unwrap();
        assert_eq!(p.as_str(), "/watched/b.txt");
        let abs = canonicalize_with_base(Path::new("/x/y"), Path::new("/ignored")).unwrap();
        assert_eq!(abs.as_str(), "/x/y");
    }

    #[test]
    fn aliases_are_not_resolved() {
        let real = canonicalize("/data/real/a.txt").unwrap();
        let link = canonicalize("/data/link/a.txt").unwrap();
        assert!(!real.matches(&link));
    }
}
