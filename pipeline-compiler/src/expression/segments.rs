// Expression segments
// Splits YAML string values into literal text, ${{ }} compile-time
// expressions, $[ ] runtime expressions and $( ) macros.

/// A piece of a string value. Runtime expressions and macros keep their raw
/// text so they can be emitted untouched after compile-time substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// Body of `${{ ... }}`, trimmed
    CompileTime(&'a str),
    /// `$[ ... ]`, raw
    Runtime(&'a str),
    /// `$(name)`, raw
    Macro(&'a str),
}

impl<'a> Segment<'a> {
    pub fn is_compile_time(&self) -> bool {
        matches!(self, Segment::CompileTime(_))
    }
}

/// Returns true if the text contains a `${{` opener.
pub fn has_compile_time(text: &str) -> bool {
    text.contains("${{")
}

/// Split a string into segments. Unterminated openers are treated as text.
pub fn extract_segments(input: &str) -> Vec<Segment<'_>> {
    let bytes = input.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }

        let found = match bytes.get(i + 1) {
            Some(b'{') if bytes.get(i + 2) == Some(&b'{') => {
                find_close(bytes, i + 3, b"}}").map(|end| {
                    let body = input[i + 3..end].trim();
                    (Segment::CompileTime(body), end + 2)
                })
            }
            Some(b'[') => find_close(bytes, i + 2, b"]")
                .map(|end| (Segment::Runtime(&input[i..end + 1]), end + 1)),
            Some(b'(') => input[i + 2..]
                .find(')')
                .map(|rel| i + 2 + rel)
                .map(|end| (Segment::Macro(&input[i..end + 1]), end + 1)),
            _ => None,
        };

        match found {
            Some((segment, next)) => {
                if text_start < i {
                    segments.push(Segment::Text(&input[text_start..i]));
                }
                segments.push(segment);
                i = next;
                text_start = next;
            }
            None => i += 1,
        }
    }

    if text_start < bytes.len() {
        segments.push(Segment::Text(&input[text_start..]));
    }

    segments
}

/// Find the closing delimiter, skipping over single-quoted string literals
/// and nested brackets.
fn find_close(bytes: &[u8], start: usize, close: &[u8]) -> Option<usize> {
    let mut in_string = false;
    let mut depth = 0usize;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
        } else if b == b'\'' {
            in_string = true;
        } else if b == b'[' || b == b'(' {
            depth += 1;
        } else if (b == b']' || b == b')') && depth > 0 {
            depth -= 1;
        } else if depth == 0 && bytes[i..].starts_with(close) {
            return Some(i);
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_compile_time() {
        assert_eq!(
            extract_segments("${{ parameters.env }}"),
            vec![Segment::CompileTime("parameters.env")]
        );
    }

    #[test]
    fn test_extract_mixed() {
        assert_eq!(
            extract_segments(
                "deploy $(Build.BuildId) to ${{ parameters.env }} when $[ succeeded() ]"
            ),
            vec![
                Segment::Text("deploy "),
                Segment::Macro("$(Build.BuildId)"),
                Segment::Text(" to "),
                Segment::CompileTime("parameters.env"),
                Segment::Text(" when "),
                Segment::Runtime("$[ succeeded() ]"),
            ]
        );
    }

    #[test]
    fn test_closing_braces_inside_string_literal() {
        assert_eq!(
            extract_segments("${{ eq(parameters.x, '}}') }}!"),
            vec![
                Segment::CompileTime("eq(parameters.x, '}}')"),
                Segment::Text("!"),
            ]
        );
    }

    #[test]
    fn test_runtime_with_index() {
        assert_eq!(
            extract_segments("$[ variables['a'] ]"),
            vec![Segment::Runtime("$[ variables['a'] ]")]
        );
    }

    #[test]
    fn test_unterminated_is_text() {
        assert_eq!(
            extract_segments("cost: $5 ${{ oops"),
            vec![Segment::Text("cost: $5 ${{ oops")]
        );
    }
}
