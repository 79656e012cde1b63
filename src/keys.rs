//! Sanitized-key functions.
//!
//! Keys within a namespace are opaque strings. Before they touch a file
//! name, an event session id, or a secret name, they are reduced to a
//! backend-safe identifier: every character outside `[A-Za-z0-9_.-]` is
//! replaced with `_`. Sanitization is idempotent, so prefix filters can be
//! expressed in terms of the sanitized form.

/// Reduces an arbitrary key to `[A-Za-z0-9_.-]`.
///
/// # Examples
///
/// ```
/// use openclaw_storage::keys::sanitize_key;
///
/// assert_eq!(sanitize_key("session-42"), "session-42");
/// assert_eq!(sanitize_key("a/b c"), "a_b_c");
/// assert_eq!(sanitize_key(sanitize_key("x:y").as_str()), "x_y");
/// ```
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect()
}

/// Like [`sanitize_key`], but keeps `/` intact.
///
/// Used for secret names, which are hierarchical on the managed secrets
/// service (`openclaw-auth/<ns>/<key>` with nested key paths allowed).
pub fn sanitize_key_path(key: &str) -> String {
    key.chars()
        .map(|c| if is_safe_char(c) || c == '/' { c } else { '_' })
        .collect()
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}
