//! Command definitions
//!
//! A command is a name plus positional, binary-safe arguments.

use bytes::Bytes;

/// Conversion into a single wire argument
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! display_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

display_arg!(i32, i64, u16, u32, u64, usize, f64);

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

/// A command ready to be encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name. May hold several words, e.g. `CONFIG GET`
    name: String,

    /// Positional arguments
    args: Vec<Bytes>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg<T: ToArg + ?Sized>(mut self, arg: &T) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append several arguments
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToArg,
    {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper-cased first word of the name, used for dispatch decisions
    pub fn keyword(&self) -> String {
        self.name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase()
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// All wire tokens: the split name followed by the arguments
    pub fn tokens(&self) -> Vec<Bytes> {
        let mut tokens: Vec<Bytes> = self
            .name
            .split_whitespace()
            .map(|word| Bytes::copy_from_slice(word.as_bytes()))
            .collect();
        tokens.extend(self.args.iter().cloned());
        tokens
    }
}
