//! Host name to HFS name normalization.
//!
//! Lengths are counted in characters. Every character encodes to exactly one
//! Mac Roman byte (unmappable ones become `?`), so a name of `n` characters
//! occupies `n` bytes in the catalog.

/// Characters HFS or the host treat as path separators.
pub const FORBIDDEN: [char; 3] = [':', '/', '\\'];
/// Written in place of each forbidden character. Mac Roman 0xE1.
pub const SUBSTITUTE: char = '\u{00B7}';
/// Used when nothing survives normalization.
pub const PLACEHOLDER: &str = "untitled";
/// Longest suffix kept intact when truncating.
const MAX_EXTENSION: usize = 6;

fn is_control(c: char) -> bool {
    c <= '\u{1F}' || c == '\u{7F}'
}

/// Produce a name that is legal in an HFS folder and at most `max_len` long.
///
/// Never fails and never returns an empty string.
pub fn normalize(name: &str, max_len: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { SUBSTITUTE } else { c })
        .filter(|&c| !is_control(c))
        .collect();
    let cleaned = cleaned.trim();

    let out = if cleaned.chars().count() > max_len {
        truncate(cleaned, max_len)
    } else {
        cleaned.to_string()
    };

    if out.is_empty() {
        PLACEHOLDER.chars().take(max_len.max(1)).collect()
    } else {
        out
    }
}

/// Shorten `name`, keeping a short extension when the stem has room for it.
fn truncate(name: &str, max_len: usize) -> String {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        let ext_len = ext.chars().count();
        if !stem.is_empty() && ext_len <= MAX_EXTENSION {
            let keep = max_len.checked_sub(1 + ext_len).filter(|&k| k > 0);
            if let Some(keep) = keep {
                let stem: String = stem.chars().take(keep).collect();
                return format!("{stem}.{ext}");
            }
        }
    }
    name.chars().take(max_len).collect()
}
