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

//! Rewrites `{{cN::text}}` and `{{cN::text::hint}}` deletions into the
//! configured marker format. Nested deletions are rewritten inside out.

use serde::Deserialize;
use serde::Serialize;

/// Output templates for cloze deletions. `{n}`, `{text}` and `{hint}` are
/// substituted; everything else is copied literally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClozeMarkerFormat {
    pub marker: String,
    /// Used when the deletion carries a hint.
    pub hinted_marker: String,
}

impl Default for ClozeMarkerFormat {
    fn default() -> Self {
        Self {
            marker: "{{c{n}::{text}}}".to_string(),
            hinted_marker: "{{c{n}::{text}::{hint}}}".to_string(),
        }
    }
}

/// Rewrite every deletion in `input`. Returns the output and the number of
/// deletions found.
pub fn remap(input: &str, format: &ClozeMarkerFormat) -> (String, usize) {
    let mut out = String::with_capacity(input.len());
    let mut count = 0;
    remap_into(input, format, &mut out, &mut count);
    (out, count)
}

fn remap_into(input: &str, format: &ClozeMarkerFormat, out: &mut String, count: &mut usize) {
    let mut rest = input;
    while let Some(pos) = rest.find("{{c") {
        let after = &rest[pos + 3..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let body_start = pos + 3 + digits + 2;
        let close = match digits > 0 && after[digits..].starts_with("::") {
            true => find_close(&rest[body_start..]),
            false => None,
        };
        let Some(len) = close else {
            out.push_str(&rest[..pos + 3]);
            rest = &rest[pos + 3..];
            continue;
        };
        let number = &after[..digits];
        let body = &rest[body_start..body_start + len];
        let (text, hint) = match find_separator(body) {
            Some(sep) => (&body[..sep], Some(&body[sep + 2..])),
            None => (body, None),
        };
        let mut inner = String::new();
        remap_into(text, format, &mut inner, count);
        out.push_str(&rest[..pos]);
        let template = match hint {
            Some(_) => &format.hinted_marker,
            None => &format.marker,
        };
        expand(template, number, &inner, hint.unwrap_or(""), out);
        *count += 1;
        rest = &rest[body_start + len + 2..];
    }
    out.push_str(rest);
}

/// Offset of the `}}` closing a deletion body, skipping nested `{{ }}` pairs.
fn find_close(body: &str) -> Option<usize> {
    let b = body.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < b.len() {
        if b[i] == b'{' && b[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if b[i] == b'}' && b[i + 1] == b'}' {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

/// Offset of the top-level `::` separating text from hint.
fn find_separator(body: &str) -> Option<usize> {
    let b = body.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < b.len() {
        match (b[i], b[i + 1]) {
            (b'{', b'{') => {
                depth += 1;
                i += 2;
            }
            (b'}', b'}') => {
                depth = depth.saturating_sub(1);
                i += 2;
            }
            (b':', b':') if depth == 0 => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn expand(template: &str, number: &str, text: &str, hint: &str, out: &mut String) {
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(r) = tail.strip_prefix("{n}") {
            out.push_str(number);
            rest = r;
        } else if let Some(r) = tail.strip_prefix("{text}") {
            out.push_str(text);
            rest = r;
        } else if let Some(r) = tail.strip_prefix("{hint}") {
            out.push_str(hint);
            rest = r;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
}
