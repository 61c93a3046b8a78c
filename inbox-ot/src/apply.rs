//! Applying operations to text buffers.

use crate::operation::{byte_offset, char_len, Operation};

/// Errors raised while applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// The operation's range reaches past the end of the text.
    OutOfRange {
        position: usize,
        length: usize,
        text_len: usize,
    },
}

impl std::fmt::Display for OtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                position,
                length,
                text_len,
            } => write!(
                f,
                "Operation range {position}..{} exceeds text length {text_len}",
                position.saturating_add(*length)
            ),
        }
    }
}

impl std::error::Error for OtError {}

/// Apply `op` to `text`, returning the new buffer.
///
/// Ranges are never clamped: `position + length` beyond the end of the text
/// is an [`OtError::OutOfRange`].
pub fn apply(text: &str, op: &Operation) -> Result<String, OtError> {
    let position = op.position();
    let length = op.length();
    let out_of_range = || OtError::OutOfRange {
        position,
        length,
        text_len: char_len(text),
    };

    let start_byte = byte_offset(text, position).ok_or_else(out_of_range)?;
    let end_byte = start_byte
        + byte_offset(&text[start_byte..], length).ok_or_else(out_of_range)?;

    let content = op.content().unwrap_or("");
    let mut out = String::with_capacity(text.len() - (end_byte - start_byte) + content.len());
    out.push_str(&text[..start_byte]);
    out.push_str(content);
    out.push_str(&text[end_byte..]);
    Ok(out)
}

/// Apply every operation in order, stopping at the first failure.
pub fn apply_all<'a, I>(text: &str, ops: I) -> Result<String, OtError>
where
    I: IntoIterator<Item = &'a Operation>,
{
    ops.into_iter()
        .try_fold(text.to_owned(), |acc, op| apply(&acc, op))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert() {
        assert_eq!(apply("hello", &Operation::insert(5, " world")).unwrap(), "hello world");
        assert_eq!(apply("hello", &Operation::insert(0, ">")).unwrap(), ">hello");
        assert_eq!(apply("", &Operation::insert(0, "x")).unwrap(), "x");
    }

    #[test]
    fn test_delete() {
        assert_eq!(apply("abcdef", &Operation::delete(1, 3)).unwrap(), "aef");
        assert_eq!(apply("abcdef", &Operation::delete(0, 6)).unwrap(), "");
        assert_eq!(apply("abcdef", &Operation::delete(6, 0)).unwrap(), "abcdef");
    }

    #[test]
    fn test_replace() {
        assert_eq!(apply("abcdef", &Operation::replace(2, 2, "XYZ")).unwrap(), "abXYZef");
        assert_eq!(apply("abc", &Operation::replace(0, 3, "")).unwrap(), "");
    }

    #[test]
    fn test_multibyte_positions() {
        assert_eq!(apply("héllo", &Operation::delete(1, 1)).unwrap(), "hllo");
        assert_eq!(apply("😀😀", &Operation::insert(1, "-")).unwrap(), "😀-😀");
        assert_eq!(apply("naïve", &Operation::replace(2, 1, "i")).unwrap(), "naive");
    }

    #[test]
    fn test_insert_past_end_is_rejected() {
        let err = apply("abc", &Operation::insert(4, "x")).unwrap_err();
        assert_eq!(
            err,
            OtError::OutOfRange {
                position: 4,
                length: 0,
                text_len: 3
            }
        );
    }

    #[test]
    fn test_delete_past_end_is_rejected_not_clamped() {
        assert!(apply("abc", &Operation::delete(1, 3)).is_err());
        assert!(apply("abc", &Operation::delete(3, 1)).is_err());
        assert!(apply("abc", &Operation::replace(2, 2, "z")).is_err());
        assert!(apply("", &Operation::delete(0, 1)).is_err());
    }

    #[test]
    fn test_overflowing_range_is_rejected() {
        assert!(apply("abc", &Operation::delete(1, usize::MAX)).is_err());
    }

    #[test]
    fn test_apply_all() {
        let ops = vec![
            Operation::insert(5, " world"),
            Operation::insert(0, "Say: "),
            Operation::delete(3, 1),
        ];
        assert_eq!(apply_all("hello", &ops).unwrap(), "Say hello world");
    }

    #[test]
    fn test_error_display() {
        let err = OtError::OutOfRange {
            position: 2,
            length: 5,
            text_len: 4,
        };
        assert_eq!(err.to_string(), "Operation range 2..7 exceeds text length 4");
    }
}
