//! Typed values and the codec registry that converts them to and from wire
//! text.
//!
//! The historical design shepherds values through a codec table as
//! `void*`+length; here each [`Value`] carries its own width/variant tag, so
//! a [`Codec`] never needs an out-of-band length parameter. Codecs are
//! looked up by `type_id`, an index into [`Registry`] fixed at registration
//! time (built-ins occupy ids 0-3; user enums start at 4).

use std::fmt;
use std::sync::Arc;

/// A setting's value, self-describing its width so codecs never need a
/// side-channel length.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64, IntWidth),
    Float(f64, FloatWidth),
    Str(String),
    /// Index into the owning codec's name table; used for both the
    /// built-in bool codec and user-registered enums.
    Enum(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    One,
    Two,
    Four,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::One => 1,
            IntWidth::Two => 2,
            IntWidth::Four => 4,
        }
    }

    fn range(self) -> (i64, i64) {
        match self {
            IntWidth::One => (i8::MIN as i64, i8::MAX as i64),
            IntWidth::Two => (i16::MIN as i64, i16::MAX as i64),
            IntWidth::Four => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    Four,
    Eight,
}

/// Significant digits used when formatting floating-point values.
pub const FLOAT_PRECISION: usize = 12;

/// Codec-local failure, free of section/name context; `store::update_value`
/// wraps this into `Error::ParseFailed` once it knows which setting failed.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    fn new(detail: impl fmt::Display) -> Self {
        CodecError(detail.to_string())
    }
}

/// A registered type: converts between [`Value`] and wire text.
pub trait Codec: fmt::Debug + Send + Sync {
    fn to_text(&self, value: &Value) -> Result<String, CodecError>;
    /// Parse `text` into a value shaped like `current` (same width/variant).
    fn from_text(&self, text: &str, current: &Value) -> Result<Value, CodecError>;
    /// Wire tag describing the type, e.g. `"enum:Name1,Name2"`; empty for
    /// non-enum codecs and for the built-in bool codec.
    fn describe_type(&self, current: &Value) -> String;
}

#[derive(Debug, Default)]
struct IntCodec;

impl Codec for IntCodec {
    fn to_text(&self, value: &Value) -> Result<String, CodecError> {
        match value {
            // widen 1-byte integers to 16 bits before printing, matching the
            // historical printf-width workaround
            Value::Int(v, IntWidth::One) => Ok((*v as i8 as i16).to_string()),
            Value::Int(v, _) => Ok(v.to_string()),
            other => Err(CodecError::new(format!("int codec given {other:?}"))),
        }
    }

    fn from_text(&self, text: &str, current: &Value) -> Result<Value, CodecError> {
        let width = match current {
            Value::Int(_, width) => *width,
            other => return Err(CodecError::new(format!("int codec given {other:?}"))),
        };
        let parsed: i64 = text
            .trim()
            .parse()
            .map_err(|_| CodecError::new(format!("{text:?} is not an integer")))?;
        let (lo, hi) = width.range();
        if parsed < lo || parsed > hi {
            return Err(CodecError::new(format!(
                "{parsed} out of range for a {}-byte integer",
                width.bytes()
            )));
        }
        Ok(Value::Int(parsed, width))
    }

    fn describe_type(&self, _current: &Value) -> String {
        String::new()
    }
}

#[derive(Debug, Default)]
struct FloatCodec;

impl Codec for FloatCodec {
    fn to_text(&self, value: &Value) -> Result<String, CodecError> {
        match value {
            Value::Float(v, _) => Ok(format_significant(*v, FLOAT_PRECISION)),
            other => Err(CodecError::new(format!("float codec given {other:?}"))),
        }
    }

    fn from_text(&self, text: &str, current: &Value) -> Result<Value, CodecError> {
        let width = match current {
            Value::Float(_, width) => *width,
            other => return Err(CodecError::new(format!("float codec given {other:?}"))),
        };
        let parsed: f64 = text
            .trim()
            .parse()
            .map_err(|_| CodecError::new(format!("{text:?} is not a number")))?;
        Ok(Value::Float(parsed, width))
    }

    fn describe_type(&self, _current: &Value) -> String {
        String::new()
    }
}

/// Format `v` with `sig` significant digits, `printf("%.*g", sig, v)`
/// style: fixed notation near unit magnitude, scientific notation for very
/// small or very large values, trailing zeros trimmed either way.
fn format_significant(v: f64, sig: usize) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }

    // Derive the decimal exponent from a round-tripped scientific rendering
    // rather than `log10().floor()`, which misrounds at exact powers of ten.
    let probe = format!("{v:e}");
    let exp: i32 = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    if exp < -4 || exp >= sig as i32 {
        let digits = sig.saturating_sub(1);
        trim_scientific(&format!("{v:.digits$e}"))
    } else {
        let decimals = (sig as i32 - 1 - exp).max(0) as usize;
        trim_fixed(&format!("{v:.decimals$}"))
    }
}

fn trim_fixed(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn trim_scientific(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{exp}", trim_fixed(mantissa)),
        None => s.to_string(),
    }
}

#[derive(Debug, Default)]
struct StringCodec;

impl Codec for StringCodec {
    fn to_text(&self, value: &Value) -> Result<String, CodecError> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => Err(CodecError::new(format!("string codec given {other:?}"))),
        }
    }

    fn from_text(&self, text: &str, _current: &Value) -> Result<Value, CodecError> {
        Ok(Value::Str(text.to_string()))
    }

    fn describe_type(&self, _current: &Value) -> String {
        String::new()
    }
}

/// An enum codec: exact-match names to/from a 1-byte index. The built-in
/// bool codec (id 3) is an untagged enum over `{"False", "True"}`; codecs
/// registered via [`Registry::register_enum`] are tagged so their wire type
/// carries the name list.
#[derive(Debug, Clone)]
pub struct EnumCodec {
    names: Vec<String>,
    tagged: bool,
}

impl EnumCodec {
    fn bool() -> Self {
        EnumCodec { names: vec!["False".to_string(), "True".to_string()], tagged: false }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Codec for EnumCodec {
    fn to_text(&self, value: &Value) -> Result<String, CodecError> {
        match value {
            Value::Enum(idx) => self
                .names
                .get(*idx as usize)
                .cloned()
                .ok_or_else(|| CodecError::new(format!("enum index {idx} out of range"))),
            other => Err(CodecError::new(format!("enum codec given {other:?}"))),
        }
    }

    fn from_text(&self, text: &str, _current: &Value) -> Result<Value, CodecError> {
        self.names
            .iter()
            .position(|name| name == text)
            .map(|idx| Value::Enum(idx as u8))
            .ok_or_else(|| CodecError::new(format!("{text:?} is not one of {:?}", self.names)))
    }

    fn describe_type(&self, _current: &Value) -> String {
        if self.tagged {
            format!("enum:{}", self.names.join(","))
        } else {
            String::new()
        }
    }
}

pub const TYPE_INT: usize = 0;
pub const TYPE_FLOAT: usize = 1;
pub const TYPE_STRING: usize = 2;
pub const TYPE_BOOL: usize = 3;

/// Ordered, append-only table of codecs. Built-ins occupy ids 0-3;
/// `register_enum` appends user-defined enums starting at id 4.
#[derive(Debug, Clone)]
pub struct Registry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl Registry {
    pub fn with_builtins() -> Self {
        let mut registry = Registry { codecs: Vec::new() };
        let int_id = registry.register(Arc::new(IntCodec));
        let float_id = registry.register(Arc::new(FloatCodec));
        let string_id = registry.register(Arc::new(StringCodec));
        let bool_id = registry.register(Arc::new(EnumCodec::bool()));
        debug_assert_eq!(int_id, TYPE_INT);
        debug_assert_eq!(float_id, TYPE_FLOAT);
        debug_assert_eq!(string_id, TYPE_STRING);
        debug_assert_eq!(bool_id, TYPE_BOOL);
        registry
    }

    /// Append a codec, returning its new `type_id` (the pre-insertion
    /// length of the table).
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> usize {
        let id = self.codecs.len();
        self.codecs.push(codec);
        id
    }

    /// Convenience wrapper for the common case: a tagged user enum.
    pub fn register_enum(&mut self, names: Vec<String>) -> usize {
        self.register(Arc::new(EnumCodec { names, tagged: true }))
    }

    pub fn get(&self, type_id: usize) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(type_id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
