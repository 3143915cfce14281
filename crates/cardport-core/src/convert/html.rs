// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A forgiving tokenizer for the HTML fragments stored in note fields.
//!
//! Field HTML is written by a rich-text editor and pasted from anywhere, so
//! nothing here rejects input: markup that cannot be parsed as a tag is
//! treated as text.

use std::borrow::Cow;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Lowercased.
    pub name: String,
    /// Lowercased names, entity-decoded values, in source order.
    pub attrs: Vec<(String, String)>,
    pub self_closing: bool,
}

/// Browsers ignore `colspan` and `rowspan` values above this.
pub const MAX_SPAN: usize = 1000;

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Numeric attribute such as `colspan`, defaulting to 1 and capped at
    /// [`MAX_SPAN`].
    pub fn span_attr(&self, name: &str) -> usize {
        self.attr(name)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map_or(1, |n| n.min(MAX_SPAN))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Raw text, entities not yet decoded.
    Text(&'a str),
    Start(Tag),
    /// Lowercased tag name.
    End(String),
    /// Comments, doctypes and processing instructions.
    Comment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    /// Byte range of the token in the input.
    pub span: Range<usize>,
}

/// Elements that never have content or an end tag.
pub const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track",
];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;
    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }
        match parse_markup(input, pos) {
            Some((kind, end)) => {
                if text_start < pos {
                    tokens.push(Token {
                        kind: TokenKind::Text(&input[text_start..pos]),
                        span: text_start..pos,
                    });
                }
                tokens.push(Token {
                    kind,
                    span: pos..end,
                });
                pos = end;
                text_start = end;
            }
            None => pos += 1,
        }
    }
    if text_start < input.len() {
        tokens.push(Token {
            kind: TokenKind::Text(&input[text_start..]),
            span: text_start..input.len(),
        });
    }
    tokens
}

fn is_name_byte(b: &u8) -> bool {
    b.is_ascii_alphanumeric() || *b == b'-' || *b == b':'
}

/// Parse the markup starting at `pos` (which holds `<`). Returns the token
/// and the offset just past it, or `None` if this `<` is plain text.
fn parse_markup(input: &str, pos: usize) -> Option<(TokenKind<'_>, usize)> {
    let rest = &input[pos..];
    if let Some(body) = rest.strip_prefix("<!--") {
        let end = body
            .find("-->")
            .map(|i| pos + 4 + i + 3)
            .unwrap_or(input.len());
        return Some((TokenKind::Comment, end));
    }
    if rest.starts_with("<!") || rest.starts_with("<?") {
        let close = rest.find('>')?;
        return Some((TokenKind::Comment, pos + close + 1));
    }
    if let Some(after) = rest.strip_prefix("</") {
        if !after.as_bytes().first()?.is_ascii_alphabetic() {
            return None;
        }
        let name_len = after.bytes().take_while(is_name_byte).count();
        let close = after.find('>')?;
        let name = after[..name_len].to_ascii_lowercase();
        return Some((TokenKind::End(name), pos + 2 + close + 1));
    }

    let after = &rest[1..];
    if !after.as_bytes().first()?.is_ascii_alphabetic() {
        return None;
    }
    let name_len = after.bytes().take_while(is_name_byte).count();
    let name = after[..name_len].to_ascii_lowercase();
    let s = &after[name_len..];
    let b = s.as_bytes();
    let mut i = 0;
    let mut attrs = Vec::new();
    let mut self_closing = false;
    let end = loop {
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= b.len() {
            return None;
        }
        match b[i] {
            b'>' => break i + 1,
            b'/' => {
                self_closing = true;
                i += 1;
                continue;
            }
            b'=' | b'"' | b'\'' => {
                i += 1;
                continue;
            }
            _ => {}
        }
        self_closing = false;
        let start = i;
        while i < b.len() && !b[i].is_ascii_whitespace() && !matches!(b[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        let attr_name = s[start..i].to_ascii_lowercase();
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = "";
        if i < b.len() && b[i] == b'=' {
            i += 1;
            while i < b.len() && b[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < b.len() && (b[i] == b'"' || b[i] == b'\'') {
                let quote = b[i];
                i += 1;
                let value_start = i;
                while i < b.len() && b[i] != quote {
                    i += 1;
                }
                if i >= b.len() {
                    return None;
                }
                value = &s[value_start..i];
                i += 1;
            } else {
                let value_start = i;
                while i < b.len() && !b[i].is_ascii_whitespace() && b[i] != b'>' {
                    i += 1;
                }
                value = &s[value_start..i];
            }
        }
        attrs.push((attr_name, decode_entities(value).into_owned()));
    };
    let tag = Tag {
        name,
        attrs,
        self_closing,
    };
    Some((TokenKind::Start(tag), pos + 1 + name_len + end))
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "deg" => '\u{b0}',
        "times" => '\u{d7}',
        "divide" => '\u{f7}',
        "middot" => '\u{b7}',
        "rarr" => '\u{2192}',
        "larr" => '\u{2190}',
        _ => return None,
    };
    Some(c)
}

fn entity(body: &str) -> Option<char> {
    if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    named_entity(body)
}

/// Decode character references. Unknown entities are left as written.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .bytes()
            .take(12)
            .position(|b| b == b';')
            .and_then(|semi| entity(&tail[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Escape an attribute value for re-emitted markup.
pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        tokenize(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tags_and_text() {
        let tokens = kinds(r#"a<B class="x">b</b><br/>"#);
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], TokenKind::Text("a"));
        let TokenKind::Start(tag) = &tokens[1] else {
            panic!("expected a start tag");
        };
        assert_eq!(tag.name, "b");
        assert_eq!(tag.attr("class"), Some("x"));
        assert_eq!(tokens[3], TokenKind::End("b".to_string()));
        let TokenKind::Start(br) = &tokens[4] else {
            panic!("expected a start tag");
        };
        assert!(br.self_closing);
    }

    #[test]
    fn test_attribute_forms() {
        let tokens = kinds(r#"<img src='a b.jpg' width=100 alt="x &amp; y" hidden>"#);
        let TokenKind::Start(tag) = &tokens[0] else {
            panic!("expected a start tag");
        };
        assert_eq!(tag.attr("src"), Some("a b.jpg"));
        assert_eq!(tag.attr("width"), Some("100"));
        assert_eq!(tag.attr("alt"), Some("x & y"));
        assert_eq!(tag.attr("hidden"), Some(""));
        assert!(!tag.self_closing);
    }

    #[test]
    fn test_stray_angle_brackets_are_text() {
        let tokens = kinds("1 < 2 and 3 <> 4 <b");
        assert_eq!(tokens, vec![TokenKind::Text("1 < 2 and 3 <> 4 <b")]);
    }

    #[test]
    fn test_gt_inside_quoted_attribute() {
        let tokens = tokenize(r#"<a title="x > y">z</a>"#);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].span, 0..17);
    }

    #[test]
    fn test_comments() {
        let tokens = kinds("a<!-- <b> -->b<!DOCTYPE html>");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Text("a"),
                TokenKind::Comment,
                TokenKind::Text("b"),
                TokenKind::Comment
            ]
        );
    }

    #[test]
    fn test_multibyte_text() {
        let tokens = kinds("日本<b>語</b>");
        assert_eq!(tokens[0], TokenKind::Text("日本"));
        assert_eq!(tokens[2], TokenKind::Text("語"));
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &lt;b&gt; &amp;&nbsp;c"), "a <b> & c");
        assert_eq!(decode_entities("&#65;&#x42;&#X43;"), "ABC");
        assert_eq!(decode_entities("&bogus; & &amp"), "&bogus; & &amp");
        assert!(matches!(decode_entities("plain"), Cow::Borrowed(_)));
    }
}
