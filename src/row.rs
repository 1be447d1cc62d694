//! Owned row handles.

use crate::error::{Error, Result};
use crate::event::Field;
use crate::value::FromValue;

/// One result tuple: a nullable raw value per column.
///
/// Rows do not carry their column metadata; the [`RowBatch`](crate::event::RowBatch)
/// that delivered them does. Text-format values are assumed unless a
/// [`Field`] is passed to [`Row::get_with`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    /// Create a row from raw column values (`None` = SQL NULL).
    pub fn new(values: Vec<Option<Vec<u8>>>) -> Self {
        Self { values }
    }

    /// Create a row of text values.
    pub fn from_text<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        Self {
            values: values
                .into_iter()
                .map(|v| v.map(|s| s.as_ref().as_bytes().to_vec()))
                .collect(),
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw bytes of column `idx`; `None` for NULL.
    pub fn raw(&self, idx: usize) -> Result<Option<&[u8]>> {
        self.values
            .get(idx)
            .map(|v| v.as_deref())
            .ok_or_else(|| Error::Decode(format!("column index {} out of range", idx)))
    }

    /// Decode column `idx` assuming text format.
    pub fn get<'a, T: FromValue<'a>>(&'a self, idx: usize) -> Result<T> {
        match self.raw(idx)? {
            None => T::from_null(),
            Some(bytes) => T::from_text(bytes),
        }
    }

    /// Decode column `idx` using the format described by `field`.
    pub fn get_with<'a, T: FromValue<'a>>(&'a self, idx: usize, field: &Field) -> Result<T> {
        match self.raw(idx)? {
            None => T::from_null(),
            Some(bytes) => T::decode(bytes, field.format),
        }
    }

    /// Column `idx` as UTF-8 text; `None` for NULL.
    pub fn get_str(&self, idx: usize) -> Result<Option<&str>> {
        self.get::<Option<&str>>(idx)
    }

    /// Parse column `idx` as a one-dimensional text-format array literal.
    ///
    /// `{a,"b c",NULL}` yields `[Some("a"), Some("b c"), None]`. A NULL column
    /// yields an empty list.
    pub fn text_array(&self, idx: usize) -> Result<Vec<Option<String>>> {
        match self.get_str(idx)? {
            None => Ok(Vec::new()),
            Some(text) => parse_text_array(text),
        }
    }

    /// Consume the row into its raw values.
    pub fn into_values(self) -> Vec<Option<Vec<u8>>> {
        self.values
    }
}

fn parse_text_array(text: &str) -> Result<Vec<Option<String>>> {
    let malformed = || Error::Decode(format!("malformed array literal: {:?}", text));

    // Optional dimension decoration: "[1:3]={...}"
    let body = match text.find("={") {
        Some(pos) if text.starts_with('[') => text.get(pos + 1..).ok_or_else(malformed)?,
        _ => text,
    };
    let inner = body
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(malformed)?;

    let mut items = Vec::new();
    if inner.trim().is_empty() {
        return Ok(items);
    }

    let mut chars = inner.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek() == Some(&'{') {
            return Err(Error::Unsupported(
                "multi-dimensional arrays".into(),
            ));
        }
        let mut item = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => item.push(chars.next().ok_or_else(malformed)?),
                    Some('"') => break,
                    Some(c) => item.push(c),
                    None => return Err(malformed()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                if c == '\\' {
                    chars.next();
                    item.push(chars.next().ok_or_else(malformed)?);
                    continue;
                }
                item.push(c);
                chars.next();
            }
            item.truncate(item.trim_end().len());
        }

        if !quoted && item.eq_ignore_ascii_case("NULL") {
            items.push(None);
        } else {
            items.push(Some(item));
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return Err(malformed()),
        }
    }
    Ok(items)
}

impl From<Vec<Option<Vec<u8>>>> for Row {
    fn from(values: Vec<Option<Vec<u8>>>) -> Self {
        Self::new(values)
    }
}
