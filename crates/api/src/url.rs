//! Url-related types.

use crate::*;

/// A validated absolute url accepted by the fetch engine.
///
/// The engine itself is scheme agnostic; it only requires that a scheme is
/// present so the registry can dispatch on it. Parsing normalises the
/// scheme to lowercase, which keeps registry lookups case insensitive.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FetchUrl(::url::Url);

impl serde::Serialize for FetchUrl {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for FetchUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: &'de str = serde::Deserialize::deserialize(deserializer)?;
        FetchUrl::parse(s).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for FetchUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for FetchUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for FetchUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::str::FromStr for FetchUrl {
    type Err = FetchError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        Self::parse(src)
    }
}

impl FetchUrl {
    /// Construct a new validated fetch url.
    pub fn parse<S: AsRef<str>>(src: S) -> FetchResult<Self> {
        let parsed = ::url::Url::parse(src.as_ref()).map_err(|err| {
            FetchError::other_src("could not parse fetch url", err)
        })?;
        Ok(Self(parsed))
    }

    /// Construct a fetch url referring to a local filesystem path.
    pub fn from_file_path<P: AsRef<std::path::Path>>(
        path: P,
    ) -> FetchResult<Self> {
        ::url::Url::from_file_path(path.as_ref()).map(Self).map_err(|_| {
            FetchError::other("path cannot be expressed as a file url")
        })
    }

    /// Get this url as a str.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The lowercase scheme this url dispatches on.
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// The host component, or the empty string for urls without one.
    ///
    /// Host-less urls (`data:`, `resource:`, ...) share a single cache key
    /// rather than being rejected.
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or("")
    }

    /// The path component (for non-hierarchical urls, everything between
    /// the scheme and any query or fragment).
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Resolve a `file:` url to a local filesystem path.
    pub fn to_file_path(&self) -> Option<std::path::PathBuf> {
        if self.0.scheme() != "file" {
            return None;
        }
        self.0.to_file_path().ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn happy_serialize() {
        const URL: &str = "http://example.com/";
        let u = FetchUrl::parse(URL).unwrap();
        let e = serde_json::to_string(&u).unwrap();
        assert_eq!(format!("\"{URL}\""), e);
        let d: FetchUrl = serde_json::from_str(&e).unwrap();
        assert_eq!(d, u);
    }

    #[test]
    fn fixture_parse() {
        const F: &[(&str, &str, &str)] = &[
            ("http://a.b/", "http", "a.b"),
            ("HTTP://A.B/x", "http", "a.b"),
            ("https://a.b:8443/x?q=1", "https", "a.b"),
            ("http://1.1.1.1/", "http", "1.1.1.1"),
            ("file:///tmp/index.html", "file", ""),
            ("data:text/plain,hi", "data", ""),
            ("resource:default.css", "resource", ""),
            ("doi:10.1000/182", "doi", ""),
        ];

        for (s, scheme, host) in F.iter() {
            let u = FetchUrl::parse(s).unwrap();
            assert_eq!(scheme, &u.scheme(), "{s}");
            assert_eq!(host, &u.host(), "{s}");
        }
    }

    #[test]
    fn fixture_no_parse() {
        const F: &[&str] = &["", "no-scheme-here", "/relative/path", "http://"];

        for s in F.iter() {
            assert!(FetchUrl::parse(s).is_err(), "{s}");
        }
    }

    #[test]
    fn file_path_round_trip() {
        let u = FetchUrl::from_file_path("/tmp/fetch-test.txt").unwrap();
        assert_eq!("file", u.scheme());
        assert_eq!(
            std::path::PathBuf::from("/tmp/fetch-test.txt"),
            u.to_file_path().unwrap(),
        );
        // only file urls resolve to paths
        assert!(FetchUrl::parse("http://a.b/x").unwrap().to_file_path().is_none());
    }
}
