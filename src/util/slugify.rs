//! Tiny slug helper used for connectivity-report file names (§6) and for
//! deriving stable log identifiers from free-form strings.
//!
//! Ported from `shared/utils/slugify.py`.

/// Lower-cases `input` and replaces any run of non-alphanumeric characters
/// with a single `-`, trimming leading/trailing dashes.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }

    while out.ends_with('-') {
        out.pop();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  multiple   spaces  "), "multiple-spaces");
        assert_eq!(slugify("already-slug"), "already-slug");
        assert_eq!(slugify(""), "");
    }
}
