//! Parsed paths shared by the dispatcher and its backends.
//!
//! A [`VfsPath`] keeps its segments exactly as written (including empty and
//! `.` segments) so that backends can apply trailing-slash and dot rules
//! themselves. Lexical cleanup is available through [`VfsPath::normalize`].

use std::fmt;

/// Path separator used when rendering paths.
pub const SEP: char = '/';

/// A path split into its root and segments.
///
/// `root` is `"/"` for absolute unix paths, a drive root such as `"C:/"` for
/// drive-qualified paths, and `""` for relative paths. The root never shows
/// up inside `segments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VfsPath {
    root: String,
    segments: Vec<String>,
    absolute: bool,
}

impl VfsPath {
    /// Parse a raw path string. Both `/` and `\` separate segments.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.replace('\\', "/");
        let bytes = raw.as_bytes();

        let (root, rest) = if raw.starts_with('/') {
            ("/".to_string(), &raw[1..])
        } else if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            let rest = raw[2..].strip_prefix('/').unwrap_or(&raw[2..]);
            (format!("{}/", &raw[..2]), rest)
        } else {
            (String::new(), raw.as_str())
        };

        let segments = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').map(str::to_string).collect()
        };

        Self {
            absolute: !root.is_empty(),
            root,
            segments,
        }
    }

    /// The root path `/`.
    pub fn root_path() -> Self {
        Self::parse("/")
    }

    /// Build a path from a root and a list of segments.
    pub fn from_segments<I, S>(root: &str, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: root.to_string(),
            segments: segments.into_iter().map(Into::into).collect(),
            absolute: !root.is_empty(),
        }
    }

    /// Same root, different segments.
    pub fn with_segments<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_segments(&self.root, segments)
    }

    /// Append one segment.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut joined = self.clone();
        joined.segments.push(segment.into());
        joined
    }

    /// Root string (`"/"`, `"C:/"` or `""`).
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path segments, root excluded.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether the path carries a root.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Last segment, if any.
    pub fn filename(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Root followed by the segments joined with `/`.
    pub fn full_path(&self) -> String {
        let mut out = self.root.clone();
        out.push_str(&self.segments.join("/"));
        out
    }

    /// Lexically drop `.` and empty segments and fold `..` into the
    /// preceding segment. `..` at the root of an absolute path is dropped.
    pub fn normalize(&self) -> Self {
        let mut segments: Vec<String> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment.as_str() {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(last) if last != ".." => {
                        segments.pop();
                    }
                    _ if self.absolute => {}
                    _ => segments.push(segment.clone()),
                },
                _ => segments.push(segment.clone()),
            }
        }
        self.with_segments(segments)
    }

    /// Resolve `raw` against `base`. Absolute inputs are only normalized.
    pub fn resolve(raw: &str, base: &VfsPath) -> Self {
        let parsed = Self::parse(raw);
        if parsed.absolute {
            return parsed.normalize();
        }
        let mut segments = base.segments.clone();
        segments.extend(parsed.segments);
        base.with_segments(segments).normalize()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

impl From<&str> for VfsPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for VfsPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}
