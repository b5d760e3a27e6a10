use std::{error::Error, fmt::Display, io};

/// Errors that may occur when reading messages from a stream.
///
/// Every variant is fatal for the connection the stream belongs to.
#[derive(Debug)]
pub enum ParseError {
    Io(io::Error),
    /// A byte that is not valid in the current lexer state
    Syntax { state: &'static str, byte: u8 },
    InvalidFormat(String),
    /// A BLOB declared a size above the configured maximum
    TooManyBytes { max: usize, got: usize },
}

impl From<io::Error> for ParseError {
    fn from(value: io::Error) -> Self {
        ParseError::Io(value)
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(error) => write!(f, "{}", error),
            ParseError::Syntax { state, byte } => {
                if byte.is_ascii_graphic() {
                    write!(f, "Unexpected '{}' in state {}", *byte as char, state)
                } else {
                    write!(f, "Unexpected byte 0x{:02x} in state {}", byte, state)
                }
            }
            ParseError::InvalidFormat(format) => write!(f, "{}", format),
            ParseError::TooManyBytes { max, got } => {
                write!(f, "BLOB too large! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseError::Io(error) => Some(error),
            _ => None,
        }
    }
}

#[test]
fn syntax_error_display() {
    let error = ParseError::Syntax {
        state: "Text",
        byte: b'<',
    };
    assert_eq!(error.to_string(), "Unexpected '<' in state Text");
    let error = ParseError::Syntax {
        state: "Idle",
        byte: 0,
    };
    assert_eq!(error.to_string(), "Unexpected byte 0x00 in state Idle");
}
