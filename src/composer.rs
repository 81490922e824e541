// src/composer.rs
//
// Frame composer: parses identifier and payload text in the current radix,
// validates it, and builds TX frames. Also holds the message editor state.

use std::fmt;

use crate::io::{FrameMessage, EXTENDED_ID_MAX, MAX_DLC, STANDARD_ID_MAX};

// ============================================================================
// Radix
// ============================================================================

/// How identifier and byte fields are read and rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Radix {
    #[default]
    #[value(name = "dec")]
    Decimal,
    #[value(name = "hex")]
    Hex,
}

impl Radix {
    pub fn toggled(self) -> Self {
        match self {
            Radix::Decimal => Radix::Hex,
            Radix::Hex => Radix::Decimal,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Radix::Decimal => "dec",
            Radix::Hex => "hex",
        }
    }
}

impl fmt::Display for Radix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{text}' is not a valid {radix} number")]
pub struct ParseError {
    pub text: String,
    pub radix: Radix,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Id is empty.")]
    EmptyId,

    #[error("DataFrame is empty.")]
    EmptyPayload,

    #[error("Id {id} is out of range for {}", id_kind(.extended))]
    IdOutOfRange { id: i64, extended: bool },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn id_kind(extended: &bool) -> &'static str {
    if *extended {
        "a 29-bit extended identifier"
    } else {
        "an 11-bit standard identifier"
    }
}

// ============================================================================
// Number Parsing
// ============================================================================

/// A well-formed field, possibly too large for `i64`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Parsed {
    Value(i64),
    Overflow { negative: bool },
}

impl Parsed {
    fn saturate(self) -> i64 {
        match self {
            Parsed::Value(value) => value,
            Parsed::Overflow { negative: true } => i64::MIN,
            Parsed::Overflow { negative: false } => i64::MAX,
        }
    }
}

fn parse_field(text: &str, radix: Radix) -> Result<Option<Parsed>, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let invalid = || ParseError {
        text: text.to_string(),
        radix,
    };

    let parsed = match radix {
        Radix::Hex => {
            if !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            i64::from_str_radix(trimmed, 16)
                .map(Parsed::Value)
                .unwrap_or(Parsed::Overflow { negative: false })
        }
        Radix::Decimal => {
            let (negative, rest) = match trimmed.as_bytes()[0] {
                b'-' => (true, &trimmed[1..]),
                b'+' => (false, &trimmed[1..]),
                _ => (false, trimmed),
            };
            let digits: String = rest.chars().filter(|&c| c != ',').collect();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            match digits.parse::<i64>() {
                Ok(magnitude) if negative => Parsed::Value(-magnitude),
                Ok(magnitude) => Parsed::Value(magnitude),
                Err(_) => Parsed::Overflow { negative },
            }
        }
    };

    Ok(Some(parsed))
}

/// Parse a field in the given radix.
///
/// Returns `Ok(None)` for empty (or all-whitespace) text. Decimal accepts an
/// optional sign and `,` separators; hex accepts `[0-9A-Fa-f]+` only.
/// Well-formed values beyond the `i64` range saturate to `i64::MIN`/`i64::MAX`.
pub fn parse_number(text: &str, radix: Radix) -> Result<Option<i64>, ParseError> {
    Ok(parse_field(text, radix)?.map(Parsed::saturate))
}

/// Clamp a parsed byte value into 0..=255
pub fn clamp_byte(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

/// Render a value in the given radix (hex is upper case, no prefix).
/// Negative values have no hex rendering.
pub fn render_number(value: i64, radix: Radix) -> Option<String> {
    match radix {
        Radix::Decimal => Some(value.to_string()),
        Radix::Hex if value >= 0 => Some(format!("{:X}", value)),
        Radix::Hex => None,
    }
}

/// Re-render field text from one radix to another.
/// Text that does not parse in `from`, overflows, or cannot be rendered in
/// `to` is kept as is.
pub fn convert_text(text: &str, from: Radix, to: Radix) -> String {
    if from == to {
        return text.to_string();
    }
    match parse_field(text, from) {
        Ok(Some(Parsed::Value(value))) => {
            render_number(value, to).unwrap_or_else(|| text.to_string())
        }
        _ => text.to_string(),
    }
}

// ============================================================================
// Frame Building
// ============================================================================

/// Build a TX frame from editor text.
///
/// Bytes are taken in order up to the first empty field; fields after a gap
/// are ignored.
pub fn build_frame<S: AsRef<str>>(
    id_text: &str,
    byte_texts: &[S],
    radix: Radix,
    is_extended: bool,
) -> Result<FrameMessage, ValidationError> {
    let id = parse_number(id_text, radix)?.ok_or(ValidationError::EmptyId)?;

    let max_id = if is_extended { EXTENDED_ID_MAX } else { STANDARD_ID_MAX };
    if !(0..=i64::from(max_id)).contains(&id) {
        return Err(ValidationError::IdOutOfRange {
            id,
            extended: is_extended,
        });
    }

    let mut data = Vec::with_capacity(MAX_DLC);
    for text in byte_texts.iter().take(MAX_DLC) {
        match parse_number(text.as_ref(), radix)? {
            Some(value) => data.push(clamp_byte(value)),
            None => break,
        }
    }

    if data.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    Ok(FrameMessage::new(id as u32, &data, is_extended))
}

// ============================================================================
// Message Editor
// ============================================================================

/// Editable message fields: id, eight payload bytes, id format and radix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEditor {
    pub id_text: String,
    pub byte_texts: [String; MAX_DLC],
    pub is_extended: bool,
    radix: Radix,
}

impl Default for MessageEditor {
    fn default() -> Self {
        Self::new(Radix::Decimal)
    }
}

impl MessageEditor {
    pub fn new(radix: Radix) -> Self {
        Self {
            id_text: "0".to_string(),
            byte_texts: std::array::from_fn(|_| "0".to_string()),
            is_extended: false,
            radix,
        }
    }

    pub fn radix(&self) -> Radix {
        self.radix
    }

    /// Switch radix, re-rendering every field
    pub fn set_radix(&mut self, radix: Radix) {
        if radix == self.radix {
            return;
        }
        self.id_text = convert_text(&self.id_text, self.radix, radix);
        for text in self.byte_texts.iter_mut() {
            *text = convert_text(text, self.radix, radix);
        }
        self.radix = radix;
    }

    /// Set one payload field; returns false if `index` is out of range
    pub fn set_byte(&mut self, index: usize, text: &str) -> bool {
        match self.byte_texts.get_mut(index) {
            Some(slot) => {
                *slot = text.trim().to_string();
                true
            }
            None => false,
        }
    }

    /// Replace the payload fields; missing trailing fields become empty
    pub fn set_bytes<S: AsRef<str>>(&mut self, texts: &[S]) {
        for (i, slot) in self.byte_texts.iter_mut().enumerate() {
            *slot = texts
                .get(i)
                .map(|t| t.as_ref().trim().to_string())
                .unwrap_or_default();
        }
    }

    pub fn build(&self) -> Result<FrameMessage, ValidationError> {
        build_frame(&self.id_text, &self.byte_texts, self.radix, self.is_extended)
    }

    /// One-line summary for the console
    pub fn summary(&self) -> String {
        let bytes: Vec<&str> = self
            .byte_texts
            .iter()
            .map(|t| if t.is_empty() { "-" } else { t.as_str() })
            .collect();
        format!(
            "{} id={} data=[{}] ({})",
            if self.is_extended { "EXT" } else { "STD" },
            if self.id_text.is_empty() { "-" } else { &self.id_text },
            bytes.join(" "),
            self.radix
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
