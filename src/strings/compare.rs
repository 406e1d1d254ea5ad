//! # Character Sequence Comparison
//!
//! Comparisons run over [`CharCursor`]s, which hand out one UTF-16 code unit
//! at a time. A cursor over a long string pulls one record's worth of
//! characters at a time, so comparing two long strings never holds more
//! than one segment of each in memory.
//!
//! ## Case Folding
//!
//! Case-insensitive comparison folds only ASCII letters: `A-Z` compare equal
//! to `a-z`, every other code unit compares by value.
//!
//! `compare_compatible_with_ignore_case` orders primarily case-insensitively
//! and breaks ties with the first case-sensitive difference. The result is
//! a total order consistent with the case-insensitive one, suitable for
//! indexes that are searched case-insensitively but must keep distinct
//! spellings apart.

use std::cmp::Ordering;

use eyre::Result;

/// Source of code units for comparison.
pub(crate) trait CharCursor {
    fn next_char(&mut self) -> Result<Option<u16>>;
}

/// Cursor over an in-memory slice.
pub(crate) struct SliceCursor<'s> {
    chars: &'s [u16],
    pos: usize,
}

impl<'s> SliceCursor<'s> {
    pub fn new(chars: &'s [u16]) -> Self {
        Self { chars, pos: 0 }
    }
}

impl CharCursor for SliceCursor<'_> {
    fn next_char(&mut self) -> Result<Option<u16>> {
        let c = self.chars.get(self.pos).copied();
        self.pos += 1;
        Ok(c)
    }
}

#[inline]
pub fn fold_ascii(c: u16) -> u16 {
    if (b'A' as u16..=b'Z' as u16).contains(&c) {
        c + 32
    } else {
        c
    }
}

#[inline]
pub fn compare_chars(a: u16, b: u16, case_sensitive: bool) -> Ordering {
    if case_sensitive {
        a.cmp(&b)
    } else {
        fold_ascii(a).cmp(&fold_ascii(b))
    }
}

/// Lexicographic comparison; a proper prefix sorts first.
pub(crate) fn compare_cursors(
    a: &mut dyn CharCursor,
    b: &mut dyn CharCursor,
    case_sensitive: bool,
) -> Result<Ordering> {
    loop {
        match (a.next_char()?, b.next_char()?) {
            (Some(x), Some(y)) => {
                let cmp = compare_chars(x, y, case_sensitive);
                if cmp != Ordering::Equal {
                    return Ok(cmp);
                }
            }
            (None, None) => return Ok(Ordering::Equal),
            (None, Some(_)) => return Ok(Ordering::Less),
            (Some(_), None) => return Ok(Ordering::Greater),
        }
    }
}

pub(crate) fn compare_cursors_compatible_with_ignore_case(
    a: &mut dyn CharCursor,
    b: &mut dyn CharCursor,
) -> Result<Ordering> {
    let mut sensitive = Ordering::Equal;
    loop {
        match (a.next_char()?, b.next_char()?) {
            (Some(x), Some(y)) => {
                if x != y {
                    let cmp = compare_chars(x, y, false);
                    if cmp != Ordering::Equal {
                        return Ok(cmp);
                    }
                    if sensitive == Ordering::Equal {
                        sensitive = x.cmp(&y);
                    }
                }
            }
            (None, None) => return Ok(sensitive),
            (None, Some(_)) => return Ok(Ordering::Less),
            (Some(_), None) => return Ok(Ordering::Greater),
        }
    }
}

/// Compares the start of `chars` against `prefix`. Equal when `chars`
/// begins with `prefix`; a sequence shorter than the prefix sorts first.
pub(crate) fn compare_cursor_prefix(
    chars: &mut dyn CharCursor,
    prefix: &[u16],
    case_sensitive: bool,
) -> Result<Ordering> {
    for &p in prefix {
        match chars.next_char()? {
            Some(c) => {
                let cmp = compare_chars(c, p, case_sensitive);
                if cmp != Ordering::Equal {
                    return Ok(cmp);
                }
            }
            None => return Ok(Ordering::Less),
        }
    }
    Ok(Ordering::Equal)
}

/// The 31-multiplier polynomial hash over code units.
pub(crate) fn hash_cursor(chars: &mut dyn CharCursor) -> Result<i32> {
    let mut h = 0i32;
    while let Some(c) = chars.next_char()? {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    Ok(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn cmp(a: &str, b: &str, case_sensitive: bool) -> Ordering {
        let (a, b) = (utf16(a), utf16(b));
        compare_cursors(&mut SliceCursor::new(&a), &mut SliceCursor::new(&b), case_sensitive)
            .unwrap()
    }

    fn compat(a: &str, b: &str) -> Ordering {
        let (a, b) = (utf16(a), utf16(b));
        compare_cursors_compatible_with_ignore_case(
            &mut SliceCursor::new(&a),
            &mut SliceCursor::new(&b),
        )
        .unwrap()
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        assert_eq!(cmp("abc", "abcd", true), Ordering::Less);
        assert_eq!(cmp("abd", "abcd", true), Ordering::Greater);
        assert_eq!(cmp("", "", true), Ordering::Equal);
    }

    #[test]
    fn case_insensitive_folds_ascii_only() {
        assert_eq!(cmp("Hello", "hELLO", false), Ordering::Equal);
        assert_eq!(cmp("Hello", "hELLO", true), Ordering::Less);
        assert_ne!(cmp("\u{c9}", "\u{e9}", false), Ordering::Equal);
    }

    #[test]
    fn compatible_order_breaks_ties_case_sensitively() {
        assert_eq!(compat("abc", "ABD"), Ordering::Less);
        assert_eq!(compat("ABC", "abc"), Ordering::Less);
        assert_eq!(compat("abc", "ABC"), Ordering::Greater);
        assert_eq!(compat("abc", "abc"), Ordering::Equal);
        assert_eq!(compat("ab", "ABC"), Ordering::Less);
    }

    #[test]
    fn prefix_comparison() {
        let s = utf16("foobar");
        let check = |p: &str, cs: bool| {
            compare_cursor_prefix(&mut SliceCursor::new(&s), &utf16(p), cs).unwrap()
        };
        assert_eq!(check("foo", true), Ordering::Equal);
        assert_eq!(check("FOO", false), Ordering::Equal);
        assert_eq!(check("FOO", true), Ordering::Greater);
        assert_eq!(check("foobarbaz", true), Ordering::Less);
        assert_eq!(check("fop", true), Ordering::Less);
    }

    #[test]
    fn hash_matches_polynomial_definition() {
        let s = utf16("abc");
        let h = hash_cursor(&mut SliceCursor::new(&s)).unwrap();
        assert_eq!(h, 96354);
    }
}
