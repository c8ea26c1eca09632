//! Store commands and replies.

use std::fmt;

use bytes::Bytes;

use crate::error::StoreError;

/// A single store command: the command name followed by its arguments,
/// each as an opaque byte string.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<Bytes>,
}

impl Command {
    /// Start a command with the given name (e.g. `"SET"`, `"CONFIG SET"`).
    pub fn new(name: impl ToArg) -> Self {
        Self {
            parts: vec![name.to_arg()],
        }
    }

    /// Build a command from already-encoded parts (name first).
    pub fn from_parts(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.parts.push(arg.to_arg());
        self
    }

    /// Append several arguments.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToArg,
    {
        self.parts.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    /// The command name, if present and valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        self.parts.first().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Every part, name included.
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    /// Argument at `index`, where index 0 is the command name.
    pub fn part(&self, index: usize) -> Option<&Bytes> {
        self.parts.get(index)
    }

    /// Number of parts, name included.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the command has no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(part))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({self})")
    }
}

/// Conversion of a value into a command argument.
///
/// Integers are sent as their decimal ASCII form.
pub trait ToArg {
    /// Encode as argument bytes.
    fn to_arg(&self) -> Bytes;
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for &String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for &Bytes {
    fn to_arg(&self) -> Bytes {
        (*self).clone()
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

macro_rules! int_to_arg {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

int_to_arg!(i32, i64, u32, u64, usize);

/// A parsed reply from a store node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Absent value (null bulk or null array).
    Nil,
    /// Simple status line such as `OK` or `PONG`.
    Status(String),
    /// Error line sent by the node.
    Error(String),
    /// Integer reply.
    Int(i64),
    /// Binary-safe string.
    Bulk(Bytes),
    /// Ordered collection of replies.
    Array(Vec<Reply>),
}

impl Reply {
    /// Whether this is a status `OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Status(s) if s == "OK")
    }

    /// Whether this is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Bulk payload, or `None` for `Nil`.
    pub fn into_bytes(self, command: &str) -> Result<Option<Bytes>, StoreError> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(b) => Ok(Some(b)),
            Self::Status(s) => Ok(Some(Bytes::from(s))),
            other => Err(unexpected(command, &other)),
        }
    }

    /// Integer payload.
    pub fn into_int(self, command: &str) -> Result<i64, StoreError> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(unexpected(command, &other)),
        }
    }

    /// Array of bulk strings (e.g. `KEYS`), skipping nothing.
    pub fn into_bulk_list(self, command: &str) -> Result<Vec<Bytes>, StoreError> {
        match self {
            Self::Nil => Ok(Vec::new()),
            Self::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Bulk(b) => Ok(b),
                    other => Err(unexpected(command, &other)),
                })
                .collect(),
            other => Err(unexpected(command, &other)),
        }
    }

    /// Flat field/value array (e.g. `HGETALL`) as pairs.
    pub fn into_pairs(self, command: &str) -> Result<Vec<(Bytes, Bytes)>, StoreError> {
        let flat = self.into_bulk_list(command)?;
        if flat.len() % 2 != 0 {
            return Err(StoreError::Protocol(format!(
                "{command}: odd number of elements in field/value reply"
            )));
        }
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((field, value));
        }
        Ok(pairs)
    }
}

fn unexpected(command: &str, reply: &Reply) -> StoreError {
    StoreError::UnexpectedReply {
        command: command.to_string(),
        reply: format!("{reply:?}"),
    }
}
