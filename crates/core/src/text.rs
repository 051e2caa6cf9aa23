/// Return at most `max_chars` characters of `s`.
///
/// Counts Unicode scalar values rather than bytes so the cut never lands
/// inside a multi-byte sequence.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
