//! Path & ID codec.
//!
//! `RecordingRef` (the caller-visible `recordingId`) is URL-safe base64,
//! no padding, of an opaque `serviceRef`. The serviceRef's last
//! colon-separated field must be an absolute path.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use percent_encoding::percent_decode_str;

const MIN_ID_LEN: usize = 16;
const MAX_ID_LEN: usize = 1024;

pub fn encode_id(service_ref: &str) -> String {
    URL_SAFE_NO_PAD.encode(service_ref.as_bytes())
}

/// Decode and validate a caller-supplied id. Non-signalling: any failure
/// collapses to `None`, never a partial value.
pub fn decode_id(id: &str) -> Option<String> {
    if id.len() < MIN_ID_LEN || id.len() > MAX_ID_LEN {
        return None;
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(id).ok()?;
    if bytes.is_empty() || bytes.contains(&0) {
        return None;
    }
    let service_ref = String::from_utf8(bytes).ok()?;
    validate_service_ref(&service_ref).ok()?;
    Some(service_ref)
}

/// `Invalid` sentinel returned by validators; never a partially-sanitized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalid;

/// Validate a serviceRef's shape. Does not return the cleaned
/// path — callers that need it use [`receiver_path_suffix`].
pub fn validate_service_ref(raw: &str) -> Result<(), Invalid> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Invalid);
    }
    if s
        .bytes()
        .any(|b| b < 0x20 || b == 0x7f || b == b'\\' || b == b'?' || b == b'#')
    {
        return Err(Invalid);
    }
    let suffix = s.rsplit(':').next().ok_or(Invalid)?;
    if !suffix.starts_with('/') {
        return Err(Invalid);
    }
    let rel = &suffix[1..];
    let decoded = percent_decode_str(rel)
        .decode_utf8()
        .map_err(|_| Invalid)?;
    if decoded.split('/').any(|seg| seg == "..") {
        return Err(Invalid);
    }
    Ok(())
}

/// Extract the absolute-path suffix of a serviceRef (text after the last `:`),
/// without the leading slash. Assumes `validate_service_ref` already passed.
pub fn receiver_path_suffix(service_ref: &str) -> Option<&str> {
    let suffix = service_ref.trim().rsplit(':').next()?;
    suffix.strip_prefix('/')
}

/// POSIX-clean a relative path and reject traversal.
///
/// `(clean, false)` never contains a `..` segment or a leading `/`.
/// `(_, true)` always returns an empty clean value.
pub fn sanitize_rel_path(q_path: &str) -> (String, bool) {
    let mut stack: Vec<&str> = Vec::new();
    for seg in q_path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                if matches!(stack.last(), Some(&"..") | None) {
                    stack.push("..");
                } else {
                    stack.pop();
                }
            }
            s => stack.push(s),
        }
    }
    let joined = stack.join("/");
    if joined == ".." || joined.starts_with("../") {
        (String::new(), true)
    } else {
        (joined, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let refs = [
            "tuner1:0:1:1:0:0:0:0:0:/media/hdd/movie/foo.ts",
            "x:/a/b/c.ts",
            "local:::/srv/recordings/a b.ts",
        ];
        for r in refs {
            let id = encode_id(r);
            assert_eq!(decode_id(&id).as_deref(), Some(r));
        }
    }

    #[test]
    fn rejects_bad_ids() {
        assert_eq!(decode_id("short"), None);
        assert_eq!(decode_id(&"a".repeat(2000)), None);
        assert_eq!(decode_id("not base64 at all!!"), None);
        assert_eq!(decode_id(&encode_id("no-leading-slash")), None);
        assert_eq!(decode_id(&encode_id("x:/a/../b")), None);
        assert_eq!(decode_id(&encode_id("x:/..")), None);
    }

    #[test]
    fn sanitize_rel_path_cases() {
        assert_eq!(sanitize_rel_path("a/./b"), ("a/b".to_string(), false));
        assert_eq!(sanitize_rel_path("a/../b"), ("b".to_string(), false));
        assert_eq!(sanitize_rel_path("."), (String::new(), false));
        assert_eq!(sanitize_rel_path(".."), (String::new(), true));
        assert_eq!(sanitize_rel_path("../a"), (String::new(), true));
        assert_eq!(sanitize_rel_path("a/../../b"), (String::new(), true));
        assert_eq!(sanitize_rel_path("/etc/passwd"), ("etc/passwd".to_string(), false));
    }

    #[test]
    fn rejects_control_and_special_chars() {
        assert!(validate_service_ref("x:/a\0b").is_err());
        assert!(validate_service_ref("x:/a\\b").is_err());
        assert!(validate_service_ref("x:/a?b").is_err());
        assert!(validate_service_ref("x:/a#b").is_err());
    }
}
