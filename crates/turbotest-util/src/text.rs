//! Source position helpers.

/// Zero-based line/column position in a text buffer.
///
/// `character` counts UTF-16 code units, matching what editors expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Convert a byte offset in `text` into a line/column position.
///
/// Offsets past the end clamp to the end of the text. Offsets that fall inside
/// a multi-byte character resolve to that character's start.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn offset_to_position(text: &str, offset: usize) -> Position {
    let mut end = offset.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = &text[..end];

    let line = prefix.bytes().filter(|&b| b == b'\n').count();
    let line_start = prefix.rfind('\n').map_or(0, |i| i + 1);
    let character: usize = prefix[line_start..].chars().map(char::len_utf16).sum();

    Position {
        line: line as u32,
        character: character as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_zero() {
        assert_eq!(offset_to_position("abc", 0), Position::default());
    }

    #[test]
    fn test_offset_on_later_line() {
        let text = "line one\n  it('x')\n";
        let offset = text.find("it(").unwrap();
        assert_eq!(
            offset_to_position(text, offset),
            Position {
                line: 1,
                character: 2
            }
        );
    }

    #[test]
    fn test_offset_clamps_past_end() {
        let pos = offset_to_position("ab\ncd", 100);
        assert_eq!(
            pos,
            Position {
                line: 1,
                character: 2
            }
        );
    }

    #[test]
    fn test_offset_counts_utf16_units() {
        // U+1F600 is two UTF-16 code units and four UTF-8 bytes.
        let text = "\u{1F600}x";
        assert_eq!(offset_to_position(text, 4).character, 2);
        // Inside the emoji snaps back to its start.
        assert_eq!(offset_to_position(text, 2).character, 0);
    }
}
