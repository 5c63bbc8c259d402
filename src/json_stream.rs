//! Lazy reader over the elements of a top-level JSON array
//!
//! The source is scanned in chunks; only the bytes of the element currently being
//! produced are held in memory. Each element is then handed to `serde_json`, so
//! element syntax errors carry the same messages `serde_json` gives elsewhere.
//!
//! ```no_run
//! use json_excelstream::json_stream::JsonArrayReader;
//!
//! let reader = JsonArrayReader::open("records.json")?;
//! for element in reader {
//!     let value = element?;
//!     println!("{}", value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{ConvertError, Result};
use serde::de::IgnoredAny;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// Where a value ends relative to the byte that ends it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// The byte belongs to the value (closing bracket or quote)
    Inclusive,
    /// The byte is a delimiter after the value
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening `[`
    Start,
    /// After `[`, expecting an element or `]`
    FirstElement,
    /// After `,`, expecting an element
    NextElement,
    /// After an element, expecting `,` or `]`
    AfterElement,
    /// Closing `]` consumed
    Done,
    /// An error was returned; iteration is over
    Failed,
}

/// Pull iterator over top-level array elements
pub struct JsonArrayReader<R: Read> {
    reader: BufReader<R>,
    state: State,
    offset: u64,
    element: Vec<u8>,
}

impl JsonArrayReader<File> {
    /// Open a JSON file for element streaming
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ConvertError::parse(0, format!("Failed to open {}: {}", path.display(), e))
        })?;
        Ok(Self::new(file))
    }
}

impl<R: Read> JsonArrayReader<R> {
    /// Wrap any reader positioned at the start of a JSON document
    pub fn new(reader: R) -> Self {
        Self::with_capacity(READ_BUFFER, reader)
    }

    /// Like [`new`](Self::new) with a custom read buffer size
    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        JsonArrayReader {
            reader: BufReader::with_capacity(capacity.max(1), reader),
            state: State::Start,
            offset: 0,
            element: Vec::with_capacity(1024),
        }
    }

    /// Byte offset consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        let offset = self.offset;
        let buf = self
            .reader
            .fill_buf()
            .map_err(|e| ConvertError::parse(offset, format!("read failed: {}", e)))?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn skip_bom(&mut self) -> Result<()> {
        let offset = self.offset;
        let buf = self
            .reader
            .fill_buf()
            .map_err(|e| ConvertError::parse(offset, format!("read failed: {}", e)))?;
        if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.reader.consume(3);
            self.offset += 3;
        }
        Ok(())
    }

    /// Copy the raw bytes of the next value into `self.element`
    fn scan_element(&mut self) -> Result<()> {
        self.element.clear();
        let start = self.offset;

        let first = match self.peek()? {
            Some(b) => b,
            None => return Err(ConvertError::parse(start, "unexpected end of input")),
        };

        match first {
            b'{' | b'[' => {
                // Depth tracked on brackets outside strings only
                let mut depth = 0usize;
                let mut in_string = false;
                let mut escaped = false;
                self.scan_until(Some("unexpected end of input inside element"), |b| {
                    if in_string {
                        if escaped {
                            escaped = false;
                        } else if b == b'\\' {
                            escaped = true;
                        } else if b == b'"' {
                            in_string = false;
                        }
                        return None;
                    }
                    match b {
                        b'"' => in_string = true,
                        b'{' | b'[' => depth += 1,
                        b'}' | b']' => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return Some(Boundary::Inclusive);
                            }
                        }
                        _ => {}
                    }
                    None
                })?;
            }
            b'"' => {
                let mut opened = false;
                let mut escaped = false;
                self.scan_until(Some("unterminated string"), |b| {
                    if !opened {
                        opened = true;
                    } else if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == b'"' {
                        return Some(Boundary::Inclusive);
                    }
                    None
                })?;
            }
            _ => {
                // Scalar literal: runs until a delimiter
                self.scan_until(None, |b| {
                    matches!(b, b',' | b']' | b'}' | b' ' | b'\t' | b'\n' | b'\r')
                        .then_some(Boundary::Exclusive)
                })?;
                if self.element.is_empty() {
                    return Err(ConvertError::parse(
                        start,
                        format!("unexpected character '{}'", first as char),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Copy bytes into `self.element` one buffered slice at a time until
    /// `boundary` reports the end of the value
    ///
    /// End of input is an error when `eof_message` is set, otherwise it ends the value.
    fn scan_until<F>(&mut self, eof_message: Option<&str>, mut boundary: F) -> Result<()>
    where
        F: FnMut(u8) -> Option<Boundary>,
    {
        loop {
            let offset = self.offset;
            let buf = self
                .reader
                .fill_buf()
                .map_err(|e| ConvertError::parse(offset, format!("read failed: {}", e)))?;
            if buf.is_empty() {
                return match eof_message {
                    Some(message) => Err(ConvertError::parse(offset, message)),
                    None => Ok(()),
                };
            }

            let mut end = None;
            for (i, &b) in buf.iter().enumerate() {
                match boundary(b) {
                    Some(Boundary::Inclusive) => {
                        end = Some(i + 1);
                        break;
                    }
                    Some(Boundary::Exclusive) => {
                        end = Some(i);
                        break;
                    }
                    None => {}
                }
            }

            let taken = end.unwrap_or(buf.len());
            self.element.extend_from_slice(&buf[..taken]);
            self.reader.consume(taken);
            self.offset += taken as u64;
            if end.is_some() {
                return Ok(());
            }
        }
    }

    /// Advance to the next element's raw bytes; `Ok(false)` at the end of the array
    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.state {
                State::Start => {
                    self.skip_bom()?;
                    match self.skip_whitespace()? {
                        Some(b'[') => {
                            self.bump();
                            self.state = State::FirstElement;
                        }
                        Some(other) => {
                            return Err(ConvertError::parse(
                                self.offset,
                                format!(
                                    "expected '[' at the start of the document, found '{}'",
                                    other as char
                                ),
                            ))
                        }
                        None => return Err(ConvertError::parse(self.offset, "empty document")),
                    }
                }
                State::FirstElement | State::NextElement => {
                    match self.skip_whitespace()? {
                        Some(b']') if self.state == State::FirstElement => {
                            self.bump();
                            self.state = State::Done;
                        }
                        Some(b']') => {
                            return Err(ConvertError::parse(
                                self.offset,
                                "trailing comma before ']'",
                            ))
                        }
                        Some(_) => {
                            self.scan_element()?;
                            self.state = State::AfterElement;
                            return Ok(true);
                        }
                        None => {
                            return Err(ConvertError::parse(
                                self.offset,
                                "unexpected end of input, array not closed",
                            ))
                        }
                    }
                }
                State::AfterElement => match self.skip_whitespace()? {
                    Some(b',') => {
                        self.bump();
                        self.state = State::NextElement;
                    }
                    Some(b']') => {
                        self.bump();
                        self.state = State::Done;
                    }
                    Some(other) => {
                        return Err(ConvertError::parse(
                            self.offset,
                            format!("expected ',' or ']', found '{}'", other as char),
                        ))
                    }
                    None => {
                        return Err(ConvertError::parse(
                            self.offset,
                            "unexpected end of input, array not closed",
                        ))
                    }
                },
                State::Done => {
                    // Only whitespace may follow the array
                    return match self.skip_whitespace()? {
                        None => Ok(false),
                        Some(other) => Err(ConvertError::parse(
                            self.offset,
                            format!("trailing characters after array: '{}'", other as char),
                        )),
                    };
                }
                State::Failed => return Ok(false),
            }
        }
    }

    fn element_offset(&self) -> u64 {
        self.offset - self.element.len() as u64
    }

    /// Skip the next element after checking it is valid JSON
    ///
    /// Returns `Ok(false)` once the array is exhausted.
    pub fn skip_element(&mut self) -> Result<bool> {
        let result = self.advance().and_then(|more| {
            if more {
                serde_json::from_slice::<IgnoredAny>(&self.element)
                    .map_err(|e| ConvertError::parse(self.element_offset(), e.to_string()))?;
            }
            Ok(more)
        });
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }
}

impl<R: Read> Iterator for JsonArrayReader<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match self.advance() {
            Ok(false) => return None,
            Ok(true) => serde_json::from_slice::<Value>(&self.element)
                .map_err(|e| ConvertError::parse(self.element_offset(), e.to_string())),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.state = State::Failed;
        }
        Some(result)
    }
}

/// Count pass: number of top-level elements in the array at `path`
///
/// Every element is validated and discarded; the first syntax error fails the count.
pub fn count_elements<P: AsRef<Path>>(path: P) -> Result<u64> {
    let mut reader = JsonArrayReader::open(path)?;
    let mut total = 0u64;
    while reader.skip_element()? {
        total += 1;
    }
    Ok(total)
}

/// Transform pass: a fresh lazy sequence over the array at `path`
pub fn open_elements<P: AsRef<Path>>(path: P) -> Result<JsonArrayReader<File>> {
    JsonArrayReader::open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn elements(input: &str) -> Result<Vec<Value>> {
        JsonArrayReader::new(input.as_bytes()).collect()
    }

    #[test]
    fn test_reads_mixed_elements() {
        let values = elements(
            r#" [ {"a": 1, "s": "x,]}\"y"}, null, 42, -1.5e3, "str", true, [1, [2]], {} ] "#,
        )
        .unwrap();
        assert_eq!(
            values,
            vec![
                json!({"a": 1, "s": "x,]}\"y"}),
                json!(null),
                json!(42),
                json!(-1500.0),
                json!("str"),
                json!(true),
                json!([1, [2]]),
                json!({}),
            ]
        );
    }

    #[test]
    fn test_empty_array_and_bom() {
        assert!(elements("[]").unwrap().is_empty());
        assert!(elements("\u{feff}[ \n ]").unwrap().is_empty());
    }

    #[test]
    fn test_structural_errors() {
        for input in [
            "",
            "{\"a\": 1}",
            "[1, 2",
            "[1,]",
            "[1 2]",
            "[{\"a\": 1]",
            "[\"open]",
            "[1] x",
            "[tru]",
        ] {
            let result = elements(input);
            assert!(
                matches!(result, Err(ConvertError::SourceParse { .. })),
                "expected parse error for {:?}, got {:?}",
                input,
                result
            );
        }
    }

    #[test]
    fn test_iteration_stops_after_error() {
        let mut reader = JsonArrayReader::new("[1, {bad}, 3]".as_bytes());
        assert_eq!(reader.next().unwrap().unwrap(), json!(1));
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_skip_element_counts() {
        let mut reader = JsonArrayReader::new(r#"[{"a":1}, null, {"a":2}]"#.as_bytes());
        let mut count = 0;
        while reader.skip_element().unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_error_offset_points_at_element() {
        let err = elements("[1, {\"a\" 2}]").unwrap_err();
        match err {
            ConvertError::SourceParse { offset, .. } => assert_eq!(offset, 4),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_elements_spanning_buffer_refills() {
        let input = r#"[{"s":"a\"]}\\","n":[1,{"x":2}]},"tail\"]",-12.5e1,null]"#;
        let expected = elements(input).unwrap();
        assert_eq!(expected.len(), 4);

        // Tiny buffers force every value across several refills
        for capacity in [1, 2, 3, 7] {
            let reader = JsonArrayReader::with_capacity(capacity, input.as_bytes());
            let values: Vec<Value> = reader.collect::<Result<_>>().unwrap();
            assert_eq!(values, expected, "capacity {}", capacity);
        }
        assert_eq!(expected[0], json!({"s": "a\"]}\\", "n": [1, {"x": 2}]}));
        assert_eq!(expected[1], json!("tail\"]"));
    }

    #[test]
    fn test_large_element_beyond_read_buffer() {
        let long = "x".repeat(READ_BUFFER * 2 + 17);
        let input = format!(r#"[{{"k":"{}"}},1]"#, long);
        let values = elements(&input).unwrap();
        assert_eq!(values, vec![json!({ "k": long }), json!(1)]);

        let mut reader = JsonArrayReader::new(input.as_bytes());
        while reader.skip_element().unwrap() {}
        assert_eq!(reader.offset(), input.len() as u64);
    }
}
