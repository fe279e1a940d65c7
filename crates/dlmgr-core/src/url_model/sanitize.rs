//! Filename sanitization for safe use across Linux and Windows-like filesystems.

/// Characters that are unsafe in a filename on at least one supported platform.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

/// Reserved device names on Windows-like platforms (case-insensitive, with or
/// without an extension).
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitizes a single path segment (filename or directory title).
///
/// - Replaces `<>:"|?*\/` and control characters with `_`
/// - Trims leading/trailing spaces and dots
/// - Collapses consecutive underscores
/// - Replaces a bare Windows-reserved device name with `_<name>_`
/// - Truncates to 255 bytes, respecting UTF-8 character boundaries
pub fn sanitize_segment(name: &str) -> String {
    const SEGMENT_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if UNSAFE_CHARS.contains(&c) || c.is_control() {
            '_'
        } else if c == '\t' {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out
        .trim_matches(|c| c == ' ' || c == '\t' || c == '.' || c == '_')
        .to_string();

    let reserved_checked = if is_reserved_name(&trimmed) {
        format!("_{}_", trimmed)
    } else {
        trimmed
    };

    truncate_to_bytes(&reserved_checked, SEGMENT_MAX)
}

/// Kept for compatibility with the URL-derived filename path, which only
/// ever needs to worry about Linux-unsafe characters (no drive-letter or
/// reserved-device concerns arise from a URL's last path segment on its own,
/// but we route through the same full sanitizer for a single source of truth).
pub fn sanitize_filename_for_linux(name: &str) -> String {
    sanitize_segment(name)
}

fn is_reserved_name(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment);
    RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(stem))
}

fn truncate_to_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut take = max_bytes;
    while take > 0 && !s.is_char_boundary(take) {
        take -= 1;
    }
    s[..take].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_slash_and_backslash() {
        assert_eq!(sanitize_segment("a/b\\c.txt"), "a_b_c.txt");
    }

    #[test]
    fn removes_spec_unsafe_chars() {
        assert_eq!(sanitize_segment("a<b>c:d\"e|f?g*h"), "a_b_c_d_e_f_g_h");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_segment("  ..  file.txt  ..  "), "file.txt");
    }

    #[test]
    fn collapses_underscores() {
        assert_eq!(sanitize_segment("file___name.txt"), "file_name.txt");
    }

    #[test]
    fn control_chars() {
        assert_eq!(sanitize_segment("file\x00name.txt"), "file_name.txt");
    }

    #[test]
    fn reserved_windows_names_quoted() {
        assert_eq!(sanitize_segment("CON"), "_CON_");
        assert_eq!(sanitize_segment("con.txt"), "_con.txt_");
        assert_eq!(sanitize_segment("LPT1"), "_LPT1_");
        assert_eq!(sanitize_segment("console"), "console");
    }

    #[test]
    fn truncates_to_255_bytes() {
        let long = "a".repeat(400);
        let out = sanitize_segment(&long);
        assert_eq!(out.len(), 255);
    }
}
