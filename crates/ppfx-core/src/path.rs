//! URL → path normalization used for prefix comparison and object keys.
//!
//! Accepts full URLs (`root://host:1094//data/f.root?opaque`), `file://`
//! URLs, and plain paths. Scheme, authority, query and fragment are
//! dropped; repeated separators collapse; `.` and `..` segments are
//! resolved lexically so a normalized path can never climb above `/`.

use crate::error::{Error, Result};

/// Normalize a URL or path to an absolute, separator-collapsed path.
///
/// The result always starts with `/` and never ends with one (except the
/// root itself).
pub fn normalize_url_path(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument("empty URL"));
    }

    let raw_path = if trimmed.contains("://") {
        let parsed = url::Url::parse(trimmed)
            .map_err(|e| Error::invalid_argument(format!("malformed URL {trimmed:?}: {e}")))?;
        let decoded = urlencoding::decode(parsed.path())
            .map_err(|e| Error::invalid_argument(format!("malformed URL {trimmed:?}: {e}")))?;
        decoded.into_owned()
    } else {
        let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
        trimmed[..end].to_string()
    };

    collapse(&raw_path)
}

/// Collapse separators and resolve dot segments of an already-extracted path.
pub fn collapse(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::invalid_argument(format!(
                        "path {path:?} escapes the root"
                    )));
                }
            }
            s => segments.push(s),
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Object key for a remote store: the normalized path without its leading `/`.
pub fn object_key(url: &str) -> Result<String> {
    let path = normalize_url_path(url)?;
    Ok(path.trim_start_matches('/').to_string())
}

/// True if `prefix` is a whole-segment prefix of `path`.
///
/// Both arguments must already be normalized. `/foo` matches `/foo` and
/// `/foo/bar` but not `/foo2`.
pub fn is_segment_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_collapse() {
        assert_eq!(normalize_url_path("/data//run1///f.root").unwrap(), "/data/run1/f.root");
        assert_eq!(normalize_url_path("/data/").unwrap(), "/data");
        assert_eq!(normalize_url_path("/").unwrap(), "/");
        assert_eq!(normalize_url_path("data/x").unwrap(), "/data/x");
    }

    #[test]
    fn urls_drop_scheme_authority_query() {
        assert_eq!(
            normalize_url_path("root://eos.example.org:1094//data/run1/f.root?xrd.wantprot=krb5")
                .unwrap(),
            "/data/run1/f.root"
        );
        assert_eq!(
            normalize_url_path("root://user@host//data/f#frag").unwrap(),
            "/data/f"
        );
        assert_eq!(normalize_url_path("file:///mnt/x").unwrap(), "/mnt/x");
    }

    #[test]
    fn plain_path_query_is_stripped() {
        assert_eq!(normalize_url_path("/data/f.root?opaque=1").unwrap(), "/data/f.root");
    }

    #[test]
    fn percent_escapes_are_decoded() {
        assert_eq!(
            normalize_url_path("root://host//data/my%20file").unwrap(),
            "/data/my file"
        );
    }

    #[test]
    fn dot_segments_resolve() {
        assert_eq!(normalize_url_path("/data/./a/../b").unwrap(), "/data/b");
        assert!(normalize_url_path("/data/../../etc/passwd").is_err());
    }

    #[test]
    fn empty_and_malformed_are_rejected() {
        assert!(normalize_url_path("").is_err());
        assert!(normalize_url_path("   ").is_err());
        assert!(normalize_url_path("root://[::1//data").is_err());
    }

    #[test]
    fn segment_prefix_respects_boundaries() {
        assert!(is_segment_prefix("/foo", "/foo"));
        assert!(is_segment_prefix("/foo", "/foo/bar"));
        assert!(!is_segment_prefix("/foo", "/foo2"));
        assert!(!is_segment_prefix("/foo", "/fo"));
        assert!(is_segment_prefix("/", "/anything"));
    }

    #[test]
    fn object_keys_have_no_leading_slash() {
        assert_eq!(object_key("root://h//data/run1/f").unwrap(), "data/run1/f");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            "[a-zA-Z0-9_.-]{1,8}".prop_filter("dot segments", |s| s != "." && s != "..")
        }

        proptest! {
            #[test]
            fn normalization_is_idempotent(segs in prop::collection::vec(segment(), 0..6), seps in 1usize..4) {
                let sep = "/".repeat(seps);
                let raw = format!("{sep}{}{sep}", segs.join(&sep));
                let once = normalize_url_path(&raw).unwrap();
                prop_assert_eq!(normalize_url_path(&once).unwrap(), once.clone());
                prop_assert!(once.starts_with('/'));
                prop_assert!(once == "/" || !once.ends_with('/'));
            }

            #[test]
            fn every_ancestor_is_a_segment_prefix(segs in prop::collection::vec(segment(), 1..6)) {
                let path = format!("/{}", segs.join("/"));
                for n in 1..=segs.len() {
                    let ancestor = format!("/{}", segs[..n].join("/"));
                    prop_assert!(is_segment_prefix(&ancestor, &path));
                }
            }
        }
    }
}
