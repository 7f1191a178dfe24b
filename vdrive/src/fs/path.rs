//! Path Utilities
//!
//! Paths have the form `<prefix>:<segments>`: a one or two character drive
//! prefix, a colon, then `/`-separated segments. This layer never
//! normalizes `.` or `..`; they are passed on as literal names.
//!
//! # Path Formats
//! - `0:/Nintendo 3DS/...` - numbered FAT drive
//! - `S:/nand.bin` - virtual drive
//! - `A:/private/movable.sed` - alias drive

use alloc::string::String;

/// Maximum path length
pub const MAX_PATH: usize = 256;

/// Path separator
pub const PATH_SEPARATOR: char = '/';

/// Split `path` after its drive prefix.
///
/// Returns the prefix including the colon and the remainder. The prefix is
/// one or two ASCII characters, neither of them a separator.
pub fn split_drive(path: &str) -> Option<(&str, &str)> {
    let colon = path.bytes().take(3).position(|b| b == b':')?;
    if colon == 0 {
        return None;
    }
    let prefix = &path.as_bytes()[..colon];
    if !prefix.iter().all(|&b| b.is_ascii_graphic() && b != b'/' && b != b'\\') {
        return None;
    }
    Some(path.split_at(colon + 1))
}

/// Single character drive letter, if the prefix has exactly one
pub fn drive_letter(path: &str) -> Option<u8> {
    match split_drive(path)? {
        (prefix, _) if prefix.len() == 2 => Some(prefix.as_bytes()[0]),
        _ => None,
    }
}

/// Whether the part after the prefix addresses the drive root
pub fn is_drive_root(rest: &str) -> bool {
    rest.is_empty() || rest == "/"
}

/// Non-empty segments of the part after the prefix
pub fn segments(rest: &str) -> impl Iterator<Item = &str> {
    rest.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
}

/// Append `name` to `dir` with exactly one separator in between
pub fn join(dir: &str, name: &str) -> String {
    let mut out = String::with_capacity(dir.len() + name.len() + 1);
    out.push_str(dir.trim_end_matches(PATH_SEPARATOR));
    out.push(PATH_SEPARATOR);
    out.push_str(name.trim_start_matches(PATH_SEPARATOR));
    out
}

/// Everything before the last separator
pub fn parent(path: &str) -> Option<&str> {
    path.rfind(PATH_SEPARATOR).map(|at| &path[..at])
}

/// Everything after the last separator
pub fn file_name(path: &str) -> &str {
    path.rfind(PATH_SEPARATOR).map_or(path, |at| &path[at + 1..])
}

/// Collapse repeated separators and drop a trailing one
pub fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == PATH_SEPARATOR && out.ends_with(PATH_SEPARATOR) {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with(PATH_SEPARATOR) && !out.ends_with(":/") {
        out.pop();
    }
    out
}

/// Case-insensitive prefix test
pub fn starts_with_ignore_case(path: &str, prefix: &str) -> bool {
    path.len() >= prefix.len()
        && path.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Wildcard match of a file name.
///
/// `?` matches exactly one character, `*` one or more. A `*` directly
/// followed by `?` or `*` never matches. Comparison ignores ASCII case.
pub fn match_name(pattern: &str, name: &str) -> bool {
    match_bytes(pattern.as_bytes(), name.as_bytes())
}

fn match_bytes(mut pattern: &[u8], mut name: &[u8]) -> bool {
    loop {
        match pattern.first() {
            Some(b'*') => break,
            None => return name.is_empty(),
            Some(&p) => {
                let Some(&c) = name.first() else {
                    return false;
                };
                if p != b'?' && !p.eq_ignore_ascii_case(&c) {
                    return false;
                }
                pattern = &pattern[1..];
                name = &name[1..];
            }
        }
    }

    let after = &pattern[1..];
    match after.first() {
        Some(b'?') | Some(b'*') => false,
        _ if name.is_empty() => false,
        None => true,
        Some(_) => (1..name.len()).any(|skip| match_bytes(after, &name[skip..])),
    }
}
