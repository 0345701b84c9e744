//! Deterministic, idempotent slug derivation shared by model/field naming
//! and the `slug` field kind (spec section 4.1).

/// Lowercase, collapse non-alphanumeric runs to a single `_`, trim leading
/// and trailing underscores.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_sep = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_runs_and_trims() {
        assert_eq!(slugify("OOOOOO mmmmm   ZZZZZZZZZZ"), "oooooo_mmmmm_zzzzzzzzzz");
    }

    #[test]
    fn handles_leading_punctuation() {
        assert_eq!(slugify("  ---Hello, World!--- "), "hello_world");
    }

    #[test]
    fn is_idempotent() {
        let once = slugify("Customer Name v2!!");
        let twice = slugify(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_yields_empty_slug() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("   "), "");
    }
}
