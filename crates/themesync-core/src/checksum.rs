//! Content checksums that match the remote store's canonical form.
//!
//! The remote normalizes text before hashing, so the local side has to apply
//! the same steps or every file would look changed:
//!
//! 1. `CRLF` becomes `LF` for recognized text types.
//! 2. JSON loses all whitespace outside string literals.
//! 3. JSON outside `assets/` gets unescaped `/` written as `\/`.
//! 4. The result is hashed with MD5 and hex encoded.

use std::path::Path;

use md5::{Digest, Md5};

const TEXT_EXTENSIONS: &[&str] = &["liquid", "js", "mjs", "json", "css", "sass", "scss"];

fn extension(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.rsplit_once('.').map(|(_, ext)| ext)
}

/// Whether `key` is stored as text remotely; text gets its line endings normalized.
pub fn is_text_file(key: &str) -> bool {
    extension(key).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// JSON keys are checksummed with insignificant whitespace removed.
pub fn is_json(key: &str) -> bool {
    extension(key).is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

pub fn is_theme_asset(key: &str) -> bool {
    key.starts_with("assets/")
}

/// Checksum of the file at `root/key`, or an empty string if it cannot be read.
pub fn checksum(root: &Path, key: &str) -> String {
    match std::fs::read(root.join(key)) {
        Ok(bytes) => checksum_content(key, &bytes),
        Err(err) => {
            tracing::debug!(key, error = %err, "unreadable file, empty checksum");
            String::new()
        }
    }
}

/// Checksum of `bytes` as if they were stored under `key`.
pub fn checksum_content(key: &str, bytes: &[u8]) -> String {
    if !is_text_file(key) {
        return md5_hex(bytes);
    }

    let mut normalized = normalize_line_endings(bytes);
    if is_json(key) {
        normalized = strip_json_whitespace(&normalized);
        if !is_theme_asset(key) {
            normalized = escape_forward_slashes(&normalized);
        }
    }
    md5_hex(&normalized)
}

fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Fold CRLF to LF.
pub fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Removes JSON whitespace that sits outside string literals.
pub fn strip_json_whitespace(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            out.push(b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b' ' | b'\n' | b'\r' | b'\t' => {}
            b'"' => {
                in_string = true;
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Writes every `/` not already preceded by an escaping backslash as `\/`.
pub fn escape_forward_slashes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 8);
    let mut pending_escape = false;

    for &b in bytes {
        if b == b'/' && !pending_escape {
            out.extend_from_slice(b"\\/");
            continue;
        }
        pending_escape = b == b'\\' && !pending_escape;
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn empty_content_hashes_empty_string() {
        assert_eq!(checksum_content("sections/empty.liquid", b""), EMPTY_MD5);
        assert_eq!(checksum_content("assets/blank.png", b""), EMPTY_MD5);
    }

    #[test]
    fn plain_md5_for_text() {
        assert_eq!(
            checksum_content("snippets/hi.liquid", b"hello"),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn crlf_normalized_for_text_types() {
        let unix = checksum_content("layout/theme.liquid", b"a\nb\n");
        let windows = checksum_content("layout/theme.liquid", b"a\r\nb\r\n");
        assert_eq!(unix, windows);
    }

    #[test]
    fn binary_files_hash_raw_bytes() {
        let a = checksum_content("assets/logo.png", b"a\r\nb");
        let b = checksum_content("assets/logo.png", b"a\nb");
        assert_ne!(a, b);
    }

    #[test]
    fn json_whitespace_outside_strings_ignored() {
        let compact = checksum_content("templates/index.json", br#"{"a":1,"b":[1,2]}"#);
        let spaced = checksum_content(
            "templates/index.json",
            b"{\n  \"a\": 1,\n  \"b\": [ 1, 2 ]\n}\n",
        );
        assert_eq!(compact, spaced);
    }

    #[test]
    fn json_whitespace_inside_strings_kept() {
        let a = checksum_content("templates/index.json", br#"{"a":"x y"}"#);
        let b = checksum_content("templates/index.json", br#"{"a":"xy"}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let stripped = strip_json_whitespace(br#"{"a": "say \"hi there\"" }"#);
        assert_eq!(stripped, br#"{"a":"say \"hi there\""}"#);
    }

    #[test]
    fn slashes_escaped_outside_assets() {
        let raw = br#"{"url":"a/b"}"#;
        let escaped = br#"{"url":"a\/b"}"#;
        assert_eq!(
            checksum_content("config/settings_data.json", raw),
            checksum_content("config/settings_data.json", escaped)
        );
        assert_eq!(
            checksum_content("config/settings_data.json", raw),
            checksum_content("assets/data.json", escaped)
        );
        assert_ne!(
            checksum_content("assets/data.json", raw),
            checksum_content("assets/data.json", escaped)
        );
    }

    #[test]
    fn double_backslash_does_not_escape_slash() {
        assert_eq!(escape_forward_slashes(br"\\/"), br"\\\/".to_vec());
        assert_eq!(escape_forward_slashes(br"\/"), br"\/".to_vec());
    }

    #[test]
    fn unreadable_file_has_empty_checksum() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(checksum(dir.path(), "sections/missing.liquid"), "");
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("snippets")).unwrap();
        std::fs::write(dir.path().join("snippets/hi.liquid"), "hello").unwrap();
        assert_eq!(
            checksum(dir.path(), "snippets/hi.liquid"),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn type_detection() {
        assert!(is_text_file("assets/theme.CSS"));
        assert!(is_text_file("sections/hero.liquid"));
        assert!(!is_text_file("assets/font.woff2"));
        assert!(!is_text_file("README"));
        assert!(is_json("locales/en.default.json"));
        assert!(is_theme_asset("assets/app.js"));
        assert!(!is_theme_asset("snippets/assets.liquid"));
    }

    proptest! {
        #[test]
        fn checksum_is_deterministic(key in "(sections|assets)/[a-z]{1,8}\\.(liquid|css|png)", body in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(checksum_content(&key, &body), checksum_content(&key, &body));
        }

        #[test]
        fn pretty_and_compact_json_agree(map in proptest::collection::btree_map("[a-z ]{1,6}", "[a-z/ ]{0,6}", 0..6)) {
            let map: BTreeMap<String, String> = map;
            let compact = serde_json::to_string(&map).unwrap();
            let pretty = serde_json::to_string_pretty(&map).unwrap();
            prop_assert_eq!(
                checksum_content("templates/page.json", compact.as_bytes()),
                checksum_content("templates/page.json", pretty.as_bytes())
            );
        }
    }
}
