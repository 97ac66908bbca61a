//! Error type shared by schema construction and both codecs, and the macros
//! used to raise them.

use std::fmt::{self, Display, Formatter};
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`].
///
/// `Validation` is a decode error: the input was well-formed but did not
/// match the schema. `Decode` covers malformed input (truncation, invalid
/// opcodes, invalid UTF-8, bad base64).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, ThisError)]
pub enum ErrorKind {
    #[error("schema error")]
    Schema,
    #[error("encode error")]
    Encode,
    #[error("decode error")]
    Decode,
    #[error("validation error")]
    Validation,
}

/// One step of the location at which a decode error occurred, innermost
/// first. Assembled as the decoder unwinds.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PathSeg {
    Field(String),
    Index(usize),
    Key(String),
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    path: Vec<PathSeg>,
    root: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            path: Vec::new(),
            root: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True for both `Decode` and its `Validation` refinement.
    pub fn is_decode_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Decode | ErrorKind::Validation)
    }

    pub fn is_validation_error(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    /// Location of a decode error relative to the decode root, outermost
    /// segment first.
    pub fn path(&self) -> impl Iterator<Item = &PathSeg> {
        self.path.iter().rev()
    }

    pub(crate) fn at_field(mut self, name: &str) -> Self {
        if self.is_decode_error() {
            self.path.push(PathSeg::Field(name.to_owned()));
        }
        self
    }

    pub(crate) fn at_index(mut self, index: usize) -> Self {
        if self.is_decode_error() {
            self.path.push(PathSeg::Index(index));
        }
        self
    }

    pub(crate) fn at_key(mut self, key: String) -> Self {
        if self.is_decode_error() {
            self.path.push(PathSeg::Key(key));
        }
        self
    }

    /// Install the label decode paths hang off of (the root struct name, or
    /// `$`). Only the outermost decode call does this.
    pub(crate) fn with_root(mut self, label: String) -> Self {
        if self.is_decode_error() && self.root.is_none() {
            self.root = Some(label);
        }
        self
    }
}

fn ident_like(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().next().is_some_and(|b| b.is_ascii_alphabetic() || b == b'_')
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_decode_error() && (self.root.is_some() || !self.path.is_empty()) {
            write!(f, "Error decoding {}", self.root.as_deref().unwrap_or("$"))?;
            for seg in self.path.iter().rev() {
                match seg {
                    PathSeg::Field(name) => write!(f, ".{}", name)?,
                    PathSeg::Index(i) => write!(f, "[{}]", i)?,
                    PathSeg::Key(k) if ident_like(k) => write!(f, ".{}", k)?,
                    PathSeg::Key(k) => write!(f, "[{}]", k)?,
                }
            }
            write!(f, ": {}", self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<Utf8Error> for Error {
    fn from(e: Utf8Error) -> Self {
        Error::new(ErrorKind::Decode, format!("invalid UTF-8: {}", e))
    }
}

impl From<FromUtf8Error> for Error {
    fn from(e: FromUtf8Error) -> Self {
        Error::new(ErrorKind::Decode, format!("invalid UTF-8: {}", e))
    }
}

macro_rules! error {
    ($kind:ident, $($t:tt)*)=>{
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($t)*))
    };
}

macro_rules! bail {
    ($kind:ident, $($t:tt)*)=>{
        return Err($crate::error::error!($kind, $($t)*))
    };
}

macro_rules! ensure {
    ($c:expr, $kind:ident, $($t:tt)*)=>{
        if !$c {
            $crate::error::bail!($kind, $($t)*);
        }
    };
}

pub(crate) use {bail, ensure, error};

#[test]
fn test_path_rendering() {
    let e = error!(Validation, "expected str, got int")
        .at_index(0)
        .at_field("groups")
        .with_root("User".to_owned());
    assert_eq!(
        e.to_string(),
        "Error decoding User.groups[0]: expected str, got int",
    );
}

#[test]
fn test_kind_classification() {
    assert!(error!(Validation, "x").is_decode_error());
    assert!(error!(Decode, "x").is_decode_error());
    assert!(!error!(Encode, "x").is_decode_error());
    assert!(!error!(Decode, "x").is_validation_error());
}
