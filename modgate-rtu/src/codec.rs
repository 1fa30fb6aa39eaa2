//! Register payload decoding and write-value encoding.
//!
//! Numeric responses are split into one equal chunk per symbolic id. A chunk
//! decodes as a big-endian signed integer of 1, 2 or 4 bytes, or as a
//! big-endian IEEE-754 float when the register uses the `float32` converter.

use std::fmt;
use std::str::FromStr;

/// A decoded register value, as reported over UDP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            // f64 Display drops a trailing ".0", so 50.0 renders as "50"
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

/// Named post-decode transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// Fixed point, one decimal: `v / 10`.
    Tenths,
    /// Chunk holds a big-endian IEEE-754 single.
    Float32,
}

impl FromStr for Converter {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenths" => Ok(Converter::Tenths),
            "float32" => Ok(Converter::Float32),
            other => Err(DecodeError::UnknownConverter(other.to_string())),
        }
    }
}

impl Converter {
    /// Parse an optional converter name from the configuration.
    pub fn from_config(name: Option<&str>) -> Result<Option<Self>, DecodeError> {
        name.map(str::parse).transpose()
    }
}

/// Errors raised while decoding a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Cannot decode a {0}-byte value")]
    UnsupportedLength(usize),
    #[error("Unknown converter '{0}'")]
    UnknownConverter(String),
    #[error("Response has no bit {0}")]
    MissingBit(usize),
}

/// Errors raised while encoding a value to write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("'{0}' does not fit in a 16-bit register")]
    OutOfRange(String),
    #[error("Converter '{0}' cannot be written to a single register")]
    NotWritable(String),
    #[error(transparent)]
    Converter(#[from] DecodeError),
}

/// Decode a coil or discrete-input response, one bit per id.
pub fn decode_bits(bits: &[bool], count: usize) -> Vec<Result<Value, DecodeError>> {
    (0..count)
        .map(|i| {
            bits.get(i)
                .copied()
                .map(Value::Bool)
                .ok_or(DecodeError::MissingBit(i))
        })
        .collect()
}

/// Flatten a register response into its big-endian byte stream.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Decode an input or holding register response into `count` values.
pub fn decode_words(
    words: &[u16],
    count: usize,
    converter: Option<&str>,
) -> Vec<Result<Value, DecodeError>> {
    decode_bytes(&words_to_bytes(words), count, converter)
}

/// Decode a byte payload into `count` equally sized chunks.
pub fn decode_bytes(
    bytes: &[u8],
    count: usize,
    converter: Option<&str>,
) -> Vec<Result<Value, DecodeError>> {
    if count == 0 {
        return Vec::new();
    }

    let converter = match Converter::from_config(converter) {
        Ok(converter) => converter,
        Err(e) => return vec![Err(e); count],
    };

    let size = bytes.len() / count;
    (0..count)
        .map(|i| {
            let chunk = &bytes[i * size..(i + 1) * size];
            decode_chunk(chunk, converter)
        })
        .collect()
}

fn decode_chunk(chunk: &[u8], converter: Option<Converter>) -> Result<Value, DecodeError> {
    match converter {
        Some(Converter::Float32) => read_float32(chunk).map(Value::Float),
        Some(Converter::Tenths) => read_int(chunk).map(|raw| Value::Float(raw as f64 / 10.0)),
        None => read_int(chunk).map(Value::Int),
    }
}

/// Read a signed big-endian integer spanning the whole chunk.
pub fn read_int(chunk: &[u8]) -> Result<i64, DecodeError> {
    match chunk {
        [b] => Ok(i64::from(*b as i8)),
        [a, b] => Ok(i64::from(i16::from_be_bytes([*a, *b]))),
        [a, b, c, d] => Ok(i64::from(i32::from_be_bytes([*a, *b, *c, *d]))),
        _ => Err(DecodeError::UnsupportedLength(chunk.len())),
    }
}

/// Read a big-endian IEEE-754 single from the start of the chunk.
pub fn read_float32(chunk: &[u8]) -> Result<f64, DecodeError> {
    match chunk {
        [a, b, c, d, ..] => Ok(f64::from(f32::from_be_bytes([*a, *b, *c, *d]))),
        _ => Err(DecodeError::UnsupportedLength(chunk.len())),
    }
}

/// Interpret a written register word the way a poll would report it.
pub fn decode_written_word(word: u16, converter: Option<&str>) -> Result<Value, DecodeError> {
    let mut values = decode_bytes(&word.to_be_bytes(), 1, converter);
    values.remove(0)
}

/// Encode a decimal value as a register word, undoing the converter.
///
/// Negative results are stored in two's complement.
pub fn encode_register_value(text: &str, converter: Option<&str>) -> Result<u16, EncodeError> {
    let value: f64 = text
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| EncodeError::InvalidNumber(text.to_string()))?;

    let scaled = match Converter::from_config(converter)? {
        None => value,
        Some(Converter::Tenths) => value * 10.0,
        Some(Converter::Float32) => {
            return Err(EncodeError::NotWritable("float32".to_string()));
        }
    };

    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 {
        return Err(EncodeError::InvalidNumber(text.to_string()));
    }

    if !(-32768.0..=65535.0).contains(&rounded) {
        return Err(EncodeError::OutOfRange(text.to_string()));
    }

    let word = rounded as i32;
    Ok(if word < 0 { word as i16 as u16 } else { word as u16 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_follow_id_order() {
        let bits = [false, true, false, false];
        let values = decode_bits(&bits, 3);
        assert_eq!(
            values,
            vec![
                Ok(Value::Bool(false)),
                Ok(Value::Bool(true)),
                Ok(Value::Bool(false)),
            ]
        );
    }

    #[test]
    fn test_single_bit_does_not_leak() {
        for set in 0..8 {
            let bits: Vec<bool> = (0..8).map(|i| i == set).collect();
            let values = decode_bits(&bits, 8);
            for (i, value) in values.into_iter().enumerate() {
                assert_eq!(value, Ok(Value::Bool(i == set)));
            }
        }
    }

    #[test]
    fn test_missing_bit() {
        let values = decode_bits(&[true], 2);
        assert_eq!(values[1], Err(DecodeError::MissingBit(1)));
    }

    #[test]
    fn test_words_split_per_id() {
        // three ids, two registers each
        let words = [0x0000, 0x0001, 0xFFFF, 0xFFFE, 0x0001, 0x0000];
        let values = decode_words(&words, 3, None);
        assert_eq!(
            values,
            vec![Ok(Value::Int(1)), Ok(Value::Int(-2)), Ok(Value::Int(65536))]
        );
    }

    #[test]
    fn test_chunks_do_not_overrun() {
        let bytes = [0x00, 0x05, 0x80, 0x00];
        let values = decode_bytes(&bytes, 2, None);
        assert_eq!(values, vec![Ok(Value::Int(5)), Ok(Value::Int(-32768))]);
    }

    #[test]
    fn test_one_byte_int() {
        assert_eq!(read_int(&[0xFF]), Ok(-1));
        assert_eq!(read_int(&[0x7F]), Ok(127));
    }

    #[test]
    fn test_unsupported_int_length() {
        assert_eq!(read_int(&[0, 0, 0]), Err(DecodeError::UnsupportedLength(3)));
        let values = decode_bytes(&[0, 0, 0, 0, 0, 0], 1, None);
        assert_eq!(values, vec![Err(DecodeError::UnsupportedLength(6))]);
    }

    #[test]
    fn test_tenths() {
        let values = decode_words(&[725], 1, Some("tenths"));
        assert_eq!(values, vec![Ok(Value::Float(72.5))]);
        assert_eq!(values[0].as_ref().unwrap().to_string(), "72.5");

        let values = decode_words(&[720], 1, Some("tenths"));
        assert_eq!(values[0].as_ref().unwrap().to_string(), "72");

        let values = decode_words(&[(-3i16) as u16], 1, Some("tenths"));
        assert_eq!(values[0].as_ref().unwrap().to_string(), "-0.3");
    }

    #[test]
    fn test_float32() {
        assert_eq!(read_float32(&[0x42, 0x48, 0x00, 0x00]), Ok(50.0));

        let values = decode_words(&[0x4248, 0x0000], 1, Some("float32"));
        assert_eq!(values, vec![Ok(Value::Float(50.0))]);
        assert_eq!(values[0].as_ref().unwrap().to_string(), "50");
    }

    #[test]
    fn test_float32_reads_chunk_start() {
        // four-register chunk, float sits in the first two
        let words = [0x4248, 0x0000, 0xDEAD, 0xBEEF];
        let values = decode_words(&words, 1, Some("float32"));
        assert_eq!(values, vec![Ok(Value::Float(50.0))]);
    }

    #[test]
    fn test_float32_short_chunk() {
        let values = decode_words(&[0x4248], 1, Some("float32"));
        assert_eq!(values, vec![Err(DecodeError::UnsupportedLength(2))]);
    }

    #[test]
    fn test_unknown_converter() {
        let values = decode_words(&[1, 2], 2, Some("hundredths"));
        assert!(values
            .iter()
            .all(|v| matches!(v, Err(DecodeError::UnknownConverter(name)) if name == "hundredths")));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Int(-12).to_string(), "-12");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
    }

    #[test]
    fn test_encode_register_value() {
        assert_eq!(encode_register_value("10", None), Ok(10));
        assert_eq!(encode_register_value("65535", None), Ok(0xFFFF));
        assert_eq!(encode_register_value("-1", None), Ok(0xFFFF));
        assert_eq!(encode_register_value("72.5", Some("tenths")), Ok(725));
        assert_eq!(
            encode_register_value("1.5", None),
            Err(EncodeError::InvalidNumber("1.5".to_string()))
        );
        assert_eq!(
            encode_register_value("70000", None),
            Err(EncodeError::OutOfRange("70000".to_string()))
        );
        assert_eq!(
            encode_register_value("abc", None),
            Err(EncodeError::InvalidNumber("abc".to_string()))
        );
        assert!(matches!(
            encode_register_value("1", Some("float32")),
            Err(EncodeError::NotWritable(_))
        ));
    }

    #[test]
    fn test_decode_written_word() {
        assert_eq!(decode_written_word(725, Some("tenths")), Ok(Value::Float(72.5)));
        assert_eq!(decode_written_word(0xFFFF, None), Ok(Value::Int(-1)));
    }
}
