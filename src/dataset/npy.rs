//! NumPy `.npy` 形式の読み書き
//!
//! 数値配列はすべて `f32` に変換して読み込みます。
//! 文字列配列は `<U{n}` (UTF-32) と `|S{n}` (バイト列) に対応します。

use crate::error::{Error, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// ヘッダ込みでデータ先頭を揃える境界
const HEADER_ALIGNMENT: usize = 64;

/// 読み込んだ配列の中身
#[derive(Debug, Clone, PartialEq)]
pub enum NpyData {
    Float(Vec<f32>),
    Text(Vec<String>),
}

/// 形状付きの配列
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: NpyData,
}

impl NpyArray {
    pub fn into_floats(self) -> Result<Vec<f32>> {
        match self.data {
            NpyData::Float(values) => Ok(values),
            NpyData::Text(_) => Err(Error::Archive(
                "expected a numeric array, found strings".to_string(),
            )),
        }
    }

    pub fn into_strings(self) -> Result<Vec<String>> {
        match self.data {
            NpyData::Text(values) => Ok(values),
            NpyData::Float(_) => Err(Error::Archive(
                "expected a string array, found numbers".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Signed,
    Unsigned,
    Float,
    Unicode,
    Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descr {
    order: ByteOrder,
    kind: Kind,
    /// 数値はバイト数、Uは文字数、Sはバイト数
    size: usize,
}

impl Descr {
    fn item_bytes(&self) -> usize {
        match self.kind {
            Kind::Unicode => self.size * 4,
            _ => self.size,
        }
    }
}

#[derive(Debug)]
struct Header {
    descr: Descr,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn parse_descr(text: &str) -> Result<Descr> {
    let mut chars = text.chars();
    let order = match chars.next() {
        Some('<') | Some('|') => ByteOrder::Little,
        Some('>') => ByteOrder::Big,
        Some('=') if cfg!(target_endian = "big") => ByteOrder::Big,
        Some('=') => ByteOrder::Little,
        _ => return Err(Error::Archive(format!("unsupported dtype '{}'", text))),
    };
    let kind = match chars.next() {
        Some('b') => Kind::Bool,
        Some('i') => Kind::Signed,
        Some('u') => Kind::Unsigned,
        Some('f') => Kind::Float,
        Some('U') => Kind::Unicode,
        Some('S') => Kind::Bytes,
        Some('O') => {
            return Err(Error::Archive(
                "object (pickled) arrays cannot be read; save plain arrays instead".to_string(),
            ))
        }
        _ => return Err(Error::Archive(format!("unsupported dtype '{}'", text))),
    };
    let size = chars
        .as_str()
        .parse::<usize>()
        .map_err(|_| Error::Archive(format!("unsupported dtype '{}'", text)))?;

    Ok(Descr { order, kind, size })
}

/// ヘッダ辞書から `key` の値部分以降を取り出す
fn value_after<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    for quote in ['\'', '"'] {
        let pattern = format!("{quote}{key}{quote}");
        if let Some(pos) = header.find(&pattern) {
            let rest = header[pos + pattern.len()..].trim_start();
            if let Some(rest) = rest.strip_prefix(':') {
                return Ok(rest.trim_start());
            }
        }
    }
    Err(Error::Archive(format!("npy header has no '{}' field", key)))
}

fn parse_header(header: &str) -> Result<Header> {
    let descr_value = value_after(header, "descr")?;
    let quote = descr_value
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| Error::Archive("npy 'descr' is not a string".to_string()))?;
    let descr_text = descr_value[1..]
        .split(quote)
        .next()
        .ok_or_else(|| Error::Archive("unterminated npy 'descr'".to_string()))?;
    let descr = parse_descr(descr_text)?;

    let fortran_value = value_after(header, "fortran_order")?;
    let fortran_order = if fortran_value.starts_with("True") {
        true
    } else if fortran_value.starts_with("False") {
        false
    } else {
        return Err(Error::Archive("npy 'fortran_order' is not a bool".to_string()));
    };

    let shape_value = value_after(header, "shape")?;
    let inner = shape_value
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
        .ok_or_else(|| Error::Archive("npy 'shape' is not a tuple".to_string()))?;
    let shape = inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| Error::Archive(format!("bad npy dimension '{}'", dim)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Header {
        descr,
        fortran_order,
        shape,
    })
}

fn words<const N: usize>(body: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    body.chunks_exact(N).map(|chunk| {
        let mut word = [0u8; N];
        word.copy_from_slice(chunk);
        word
    })
}

macro_rules! decode_words {
    ($body:expr, $big:expr, $ty:ty, $n:literal) => {
        words::<$n>($body)
            .map(|w| {
                (if $big {
                    <$ty>::from_be_bytes(w)
                } else {
                    <$ty>::from_le_bytes(w)
                }) as f32
            })
            .collect::<Vec<f32>>()
    };
}

fn decode_numeric(descr: Descr, body: &[u8]) -> Result<Vec<f32>> {
    let big = descr.order == ByteOrder::Big;
    let values = match (descr.kind, descr.size) {
        (Kind::Bool, 1) => body.iter().map(|b| if *b != 0 { 1.0 } else { 0.0 }).collect(),
        (Kind::Unsigned, 1) => body.iter().map(|b| *b as f32).collect(),
        (Kind::Signed, 1) => body.iter().map(|b| *b as i8 as f32).collect(),
        (Kind::Unsigned, 2) => decode_words!(body, big, u16, 2),
        (Kind::Signed, 2) => decode_words!(body, big, i16, 2),
        (Kind::Unsigned, 4) => decode_words!(body, big, u32, 4),
        (Kind::Signed, 4) => decode_words!(body, big, i32, 4),
        (Kind::Unsigned, 8) => decode_words!(body, big, u64, 8),
        (Kind::Signed, 8) => decode_words!(body, big, i64, 8),
        (Kind::Float, 4) => decode_words!(body, big, f32, 4),
        (Kind::Float, 8) => decode_words!(body, big, f64, 8),
        (kind, size) => {
            return Err(Error::Archive(format!(
                "unsupported numeric dtype {:?} of {} bytes",
                kind, size
            )))
        }
    };
    Ok(values)
}

fn decode_text(descr: Descr, body: &[u8]) -> Result<Vec<String>> {
    let item_bytes = descr.item_bytes();
    if item_bytes == 0 {
        return Ok(Vec::new());
    }

    body.chunks_exact(item_bytes)
        .map(|item| match descr.kind {
            Kind::Unicode => {
                let text = words::<4>(item)
                    .map(|w| {
                        let code = if descr.order == ByteOrder::Big {
                            u32::from_be_bytes(w)
                        } else {
                            u32::from_le_bytes(w)
                        };
                        char::from_u32(code).ok_or_else(|| {
                            Error::Archive(format!("invalid code point {:#x}", code))
                        })
                    })
                    .collect::<Result<String>>()?;
                Ok(text.trim_end_matches('\0').to_string())
            }
            _ => {
                let end = item.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
                String::from_utf8(item[..end].to_vec())
                    .map_err(|e| Error::Archive(format!("invalid UTF-8 string: {}", e)))
            }
        })
        .collect()
}

/// 本体のバイト数
///
/// 0の次元があっても、残りの次元の積がusizeに収まらない形状は拒否する。
fn body_len(shape: &[usize], item_bytes: usize) -> Option<usize> {
    shape
        .iter()
        .try_fold(item_bytes.max(1), |acc, &dim| acc.checked_mul(dim.max(1)))?;
    shape
        .iter()
        .try_fold(item_bytes, |acc, &dim| acc.checked_mul(dim))
}

/// `.npy` のバイト列を読み込む
pub fn read_npy(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(Error::Archive("missing .npy magic string".to_string()));
    }

    let (header_len, offset) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(Error::Archive("truncated .npy header".to_string()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        major => {
            return Err(Error::Archive(format!(
                "unsupported .npy format version {}",
                major
            )))
        }
    };

    let header_end = offset + header_len;
    if bytes.len() < header_end {
        return Err(Error::Archive("truncated .npy header".to_string()));
    }
    let header_text = std::str::from_utf8(&bytes[offset..header_end])
        .map_err(|e| Error::Archive(format!("non UTF-8 .npy header: {}", e)))?;
    let header = parse_header(header_text)?;

    if header.fortran_order {
        return Err(Error::Archive(
            "Fortran-ordered arrays are not supported".to_string(),
        ));
    }

    let needed = body_len(&header.shape, header.descr.item_bytes())
        .ok_or_else(|| Error::Archive(format!("npy shape overflows: {:?}", header.shape)))?;
    let body = &bytes[header_end..];
    if body.len() < needed {
        return Err(Error::Archive(format!(
            "truncated .npy body: expected {} bytes, found {}",
            needed,
            body.len()
        )));
    }
    let body = &body[..needed];

    let data = match header.descr.kind {
        Kind::Unicode | Kind::Bytes => NpyData::Text(decode_text(header.descr, body)?),
        _ => NpyData::Float(decode_numeric(header.descr, body)?),
    };

    Ok(NpyArray {
        shape: header.shape,
        data,
    })
}

fn encode_header(descr: &str, shape: &[usize]) -> Vec<u8> {
    let shape_text = match shape {
        [] => "()".to_string(),
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape_text
    );
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (HEADER_ALIGNMENT - unpadded % HEADER_ALIGNMENT) % HEADER_ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out
}

fn check_len(shape: &[usize], len: usize) -> Result<()> {
    let expected = body_len(shape, 1)
        .ok_or_else(|| Error::Shape(format!("shape {:?} overflows", shape)))?;
    if expected != len {
        return Err(Error::Shape(format!(
            "shape {:?} needs {} values, got {}",
            shape, expected, len
        )));
    }
    Ok(())
}

/// `<f4` 配列として書き出す
pub fn write_npy_f32(shape: &[usize], values: &[f32]) -> Result<Vec<u8>> {
    check_len(shape, values.len())?;
    let mut out = encode_header("<f4", shape);
    out.reserve(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    Ok(out)
}

/// `|u1` 配列として書き出す
#[cfg(test)]
pub(crate) fn write_npy_u8(shape: &[usize], values: &[u8]) -> Result<Vec<u8>> {
    check_len(shape, values.len())?;
    let mut out = encode_header("|u1", shape);
    out.extend_from_slice(values);
    Ok(out)
}

/// 1次元の `<U{n}` 配列として書き出す（nは最長文字数）
pub fn write_npy_strings(values: &[String]) -> Vec<u8> {
    let width = values
        .iter()
        .map(|v| v.chars().count())
        .max()
        .unwrap_or(0)
        .max(1);
    let mut out = encode_header(&format!("<U{}", width), &[values.len()]);
    for value in values {
        let mut written = 0;
        for ch in value.chars() {
            out.extend_from_slice(&(ch as u32).to_le_bytes());
            written += 1;
        }
        for _ in written..width {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_npy(header: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_read_uint8_image_block() {
        let bytes = raw_npy(
            "{'descr': '|u1', 'fortran_order': False, 'shape': (1, 2, 2, 3), }      \n",
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 255],
        );
        let array = read_npy(&bytes).unwrap();
        assert_eq!(array.shape, vec![1, 2, 2, 3]);
        let values = array.into_floats().unwrap();
        assert_eq!(values.len(), 12);
        assert_eq!(values[11], 255.0);
    }

    #[test]
    fn test_read_big_endian_float64() {
        let mut body = Vec::new();
        body.extend_from_slice(&1.5f64.to_be_bytes());
        body.extend_from_slice(&(-2.0f64).to_be_bytes());
        let bytes = raw_npy("{'descr': '>f8', 'fortran_order': False, 'shape': (2,), }\n", &body);
        let values = read_npy(&bytes).unwrap().into_floats().unwrap();
        assert_eq!(values, vec![1.5, -2.0]);
    }

    #[test]
    fn test_unicode_names_are_trimmed() {
        let names = vec!["img_1.png".to_string(), "a_22.jpg".to_string()];
        let bytes = write_npy_strings(&names);
        let array = read_npy(&bytes).unwrap();
        assert_eq!(array.shape, vec![2]);
        assert_eq!(array.into_strings().unwrap(), names);
    }

    #[test]
    fn test_byte_strings() {
        let bytes = raw_npy(
            "{'descr': '|S4', 'fortran_order': False, 'shape': (2,), }\n",
            b"ab\0\0wxyz",
        );
        let names = read_npy(&bytes).unwrap().into_strings().unwrap();
        assert_eq!(names, vec!["ab".to_string(), "wxyz".to_string()]);
    }

    #[test]
    fn test_written_header_is_aligned() {
        let bytes = write_npy_f32(&[2, 3], &[0.0; 6]).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % HEADER_ALIGNMENT, 0);
        assert_eq!(bytes.len(), 10 + header_len + 6 * 4);
    }

    #[test]
    fn test_rejects_object_arrays() {
        let bytes = raw_npy("{'descr': '|O', 'fortran_order': False, 'shape': (), }\n", &[]);
        let err = read_npy(&bytes).unwrap_err();
        assert!(err.to_string().contains("pickled"));
    }

    #[test]
    fn test_rejects_fortran_order() {
        let bytes = raw_npy(
            "{'descr': '<f4', 'fortran_order': True, 'shape': (1,), }\n",
            &1.0f32.to_le_bytes(),
        );
        assert!(matches!(read_npy(&bytes), Err(Error::Archive(_))));
    }

    #[test]
    fn test_rejects_truncated_body() {
        let bytes = raw_npy("{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }\n", &[0; 8]);
        let err = read_npy(&bytes).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_rejects_overflowing_shape() {
        let huge = "{'descr': '|u1', 'fortran_order': False, 'shape': (4611686018427387904, 4, 1, 3), }\n";
        let err = read_npy(&raw_npy(huge, &[])).unwrap_err();
        assert!(matches!(err, Error::Archive(ref m) if m.contains("overflows")));

        // 先頭が0でも残りの次元の積が溢れる形状は拒否する
        let hidden = "{'descr': '<f4', 'fortran_order': False, 'shape': (0, 4294967296, 4294967296, 3), }\n";
        assert!(matches!(read_npy(&raw_npy(hidden, &[])), Err(Error::Archive(_))));

        let empty = "{'descr': '<f4', 'fortran_order': False, 'shape': (0, 4, 4, 3), }\n";
        assert_eq!(read_npy(&raw_npy(empty, &[])).unwrap().shape, vec![0, 4, 4, 3]);
    }

    #[test]
    fn test_write_checks_length() {
        assert!(matches!(write_npy_u8(&[2, 2], &[1, 2, 3]), Err(Error::Shape(_))));
    }
}
