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

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Captures;
use regex::Regex;

use crate::convert::ConversionConfig;
use crate::convert::ConversionStats;
use crate::convert::html::Tag;
use crate::convert::html::Token;
use crate::convert::html::TokenKind;
use crate::convert::html::decode_entities;
use crate::convert::html::escape_attr;
use crate::convert::html::is_void;
use crate::convert::media::MediaKind;
use crate::convert::media::MediaReference;
use crate::convert::media::is_external;
use crate::convert::media::src_placeholder;
use crate::convert::table;

/// `[sound:x]` tags and MathJax delimiters, found in decoded text.
static TEXT_SPECIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[sound:([^\]]+)\]|\\\((.+?)\\\)|\\\[(.+?)\\\]")
        .expect("text pattern to compile")
});

static SOUND_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[sound:([^\]]+)\]").expect("sound pattern to compile"));

/// Elements whose content is never shown.
const HIDDEN: [&str; 4] = ["script", "style", "head", "title"];

#[derive(Debug)]
enum FrameKind {
    /// Markdown delimiters around the content, such as `**`.
    Wrap(&'static str),
    Code,
    Link(String),
    Heading(usize),
    Blockquote,
    /// Markup kept as HTML; the closing tag to emit, if any.
    Raw(Option<String>),
}

/// An open element whose output starts at `start`.
#[derive(Debug)]
struct Frame {
    tag: String,
    kind: FrameKind,
    start: usize,
}

#[derive(Debug, Clone, Copy)]
enum List {
    Unordered,
    Ordered(u64),
}

impl List {
    fn marker_width(self) -> usize {
        match self {
            List::Unordered => 2,
            List::Ordered(n) => n.saturating_sub(1).max(1).to_string().len() + 2,
        }
    }
}

/// An open `<audio>` or `<video>`; its `<source>` children become references.
#[derive(Debug, Clone, Copy)]
struct MediaParent {
    kind: MediaKind,
    referenced: bool,
}

/// Streams tokens into Markdown, collecting media references and everything
/// else the conversion reports.
pub(crate) struct Writer<'a, 'c> {
    input: &'a str,
    config: &'c ConversionConfig,
    out: String,
    frames: Vec<Frame>,
    lists: Vec<List>,
    pre: usize,
    code: usize,
    hidden: Option<String>,
    media_parent: Option<MediaParent>,
    pub media: Vec<MediaReference>,
    pub preserved: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: ConversionStats,
}

impl<'a, 'c> Writer<'a, 'c> {
    pub fn new(input: &'a str, config: &'c ConversionConfig) -> Self {
        Self {
            input,
            config,
            out: String::new(),
            frames: Vec::new(),
            lists: Vec::new(),
            pre: 0,
            code: 0,
            hidden: None,
            media_parent: None,
            media: Vec::new(),
            preserved: Vec::new(),
            warnings: Vec::new(),
            stats: ConversionStats::default(),
        }
    }

    /// Convert the whole input. Returns the raw Markdown, before blank-line
    /// cleanup.
    pub fn write_all(&mut self, tokens: &[Token<'a>]) -> String {
        self.run(tokens);
        self.close_all();
        std::mem::take(&mut self.out)
    }

    fn run(&mut self, tokens: &[Token<'a>]) {
        let input = self.input;
        let mut idx = 0;
        while idx < tokens.len() {
            let token = &tokens[idx];
            if let Some(hidden) = &self.hidden {
                if matches!(&token.kind, TokenKind::End(name) if name == hidden) {
                    self.hidden = None;
                }
                idx += 1;
                continue;
            }
            match &token.kind {
                TokenKind::Text(text) => self.text(text),
                TokenKind::Start(tag) if tag.name == "table" && self.pre == 0 => {
                    let end = table::matching_end(tokens, idx);
                    self.table(&tokens[idx..=end]);
                    idx = end + 1;
                    continue;
                }
                TokenKind::Start(tag) => self.start(tag, &input[token.span.clone()]),
                TokenKind::End(name) => self.end(name),
                TokenKind::Comment => {}
            }
            idx += 1;
        }
    }

    fn start(&mut self, tag: &Tag, raw: &str) {
        let name = tag.name.as_str();
        match name {
            "b" | "strong" => self.open(name, FrameKind::Wrap("**")),
            "i" | "em" => self.open(name, FrameKind::Wrap("*")),
            "s" | "del" | "strike" => self.open(name, FrameKind::Wrap("~~")),
            "code" if self.pre == 0 => {
                self.code += 1;
                self.open(name, FrameKind::Code);
            }
            "u" | "sup" | "sub" => {
                self.out.push_str(&format!("<{name}>"));
                self.open(name, FrameKind::Raw(Some(format!("</{name}>"))));
            }
            "span" | "font" => {
                if self.config.preserve_styles && !tag.attrs.is_empty() {
                    self.out.push_str(raw);
                    self.open(name, FrameKind::Raw(Some(format!("</{name}>"))));
                } else {
                    self.open(name, FrameKind::Raw(None));
                }
            }
            "a" => {
                let href = tag.attr("href").unwrap_or("").trim().to_string();
                self.open(name, FrameKind::Link(href));
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.ensure_blank_line();
                let level = usize::from(name.as_bytes()[1] - b'0');
                self.open(name, FrameKind::Heading(level));
            }
            "blockquote" => {
                self.ensure_blank_line();
                self.open(name, FrameKind::Blockquote);
            }
            "br" => {
                self.trim_trailing_spaces();
                self.out.push('\n');
            }
            "div" => self.ensure_newline(),
            "p" => self.ensure_blank_line(),
            "hr" => {
                self.ensure_blank_line();
                self.out.push_str("---");
                self.ensure_blank_line();
            }
            "pre" => {
                self.ensure_blank_line();
                self.out.push_str("```\n");
                self.pre += 1;
            }
            "ul" => {
                self.ensure_newline();
                self.lists.push(List::Unordered);
            }
            "ol" => {
                self.ensure_newline();
                let first = tag
                    .attr("start")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(1);
                self.lists.push(List::Ordered(first));
            }
            "li" => self.list_item(),
            "img" => self.image(tag),
            "audio" | "video" => {
                let kind = match name {
                    "audio" => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                let referenced = match tag.attr("src") {
                    Some(src) => self.reference(src, kind, tag).is_some(),
                    None => false,
                };
                if !tag.self_closing {
                    self.media_parent = Some(MediaParent { kind, referenced });
                }
            }
            "source" => {
                let Some(parent) = self.media_parent else {
                    return;
                };
                if parent.referenced {
                    return;
                }
                if let Some(src) = tag.attr("src") {
                    let referenced = self.reference(src, parent.kind, tag).is_some();
                    self.media_parent = Some(MediaParent {
                        referenced,
                        ..parent
                    });
                }
            }
            _ if HIDDEN.contains(&name) && !tag.self_closing => {
                self.hidden = Some(name.to_string());
            }
            _ => {}
        }
    }

    fn end(&mut self, name: &str) {
        match name {
            "div" | "li" => self.ensure_newline(),
            "p" => self.ensure_blank_line(),
            "ul" | "ol" => {
                self.lists.pop();
                self.ensure_newline();
                if self.lists.is_empty() {
                    self.ensure_blank_line();
                }
            }
            "pre" if self.pre > 0 => {
                self.close_fence();
            }
            "audio" | "video" => self.media_parent = None,
            _ => {}
        }
        if is_void(name) {
            return;
        }
        if let Some(pos) = self.frames.iter().rposition(|f| f.tag == name) {
            while self.frames.len() > pos {
                if let Some(frame) = self.frames.pop() {
                    self.close(frame);
                }
            }
        }
    }

    fn open(&mut self, tag: &str, kind: FrameKind) {
        self.frames.push(Frame {
            tag: tag.to_string(),
            kind,
            start: self.out.len(),
        });
    }

    fn close(&mut self, frame: Frame) {
        let start = frame.start.min(self.out.len());
        match frame.kind {
            FrameKind::Wrap(marker) => {
                let inner = self.out.split_off(start);
                self.out.push_str(&wrap_lines(&inner, marker));
            }
            FrameKind::Code => {
                self.code = self.code.saturating_sub(1);
                let inner = self.out.split_off(start);
                self.out.push_str(&wrap_lines(&inner, "`"));
            }
            FrameKind::Link(href) => {
                let inner = self.out.split_off(start);
                let (lead, text, trail) = split_padding(&inner);
                self.out.push_str(lead);
                if href.is_empty() || href.to_ascii_lowercase().starts_with("javascript:") {
                    self.out.push_str(text);
                } else if text.is_empty() {
                    self.out.push_str(&format!("<{href}>"));
                } else {
                    self.out.push_str(&format!("[{text}]({})", href.replace(' ', "%20")));
                }
                self.out.push_str(trail);
            }
            FrameKind::Heading(level) => {
                let inner = self.out.split_off(start);
                let text = inner.split_whitespace().collect::<Vec<_>>().join(" ");
                if !text.is_empty() {
                    self.out.push_str(&"#".repeat(level));
                    self.out.push(' ');
                    self.out.push_str(&text);
                }
                self.ensure_blank_line();
            }
            FrameKind::Blockquote => {
                let inner = self.out.split_off(start);
                let quoted = inner
                    .trim()
                    .lines()
                    .map(|line| match line.trim_end() {
                        "" => ">".to_string(),
                        line => format!("> {line}"),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                self.out.push_str(&quoted);
                self.ensure_blank_line();
            }
            FrameKind::Raw(close) => {
                if let Some(close) = close {
                    self.out.push_str(&close);
                }
            }
        }
    }

    fn close_all(&mut self) {
        while let Some(frame) = self.frames.pop() {
            self.close(frame);
        }
        while self.pre > 0 {
            self.close_fence();
        }
    }

    fn close_fence(&mut self) {
        if !self.out.ends_with('\n') {
            self.out.push('\n');
        }
        self.out.push_str("```");
        self.pre -= 1;
        self.ensure_blank_line();
    }

    fn list_item(&mut self) {
        self.ensure_newline();
        let depth = self.lists.len();
        let indent: usize = match depth {
            0 => 0,
            _ => self.lists[..depth - 1]
                .iter()
                .map(|list| list.marker_width())
                .sum(),
        };
        self.out.push_str(&" ".repeat(indent));
        match self.lists.last_mut() {
            Some(List::Ordered(n)) => {
                self.out.push_str(&format!("{n}. "));
                *n += 1;
            }
            _ => self.out.push_str("- "),
        }
    }

    fn text(&mut self, raw: &str) {
        if self.media_parent.is_some() {
            return;
        }
        let decoded = decode_entities(raw);
        if self.pre > 0 {
            self.out.push_str(&decoded);
            return;
        }
        let mut last = 0;
        for caps in TEXT_SPECIAL.captures_iter(&decoded) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            self.plain(&decoded[last..whole.start()]);
            if let Some(sound) = caps.get(1) {
                self.sound(sound.as_str());
            } else if let Some(math) = caps.get(2) {
                self.out.push_str(&format!("${}$", math.as_str()));
            } else if let Some(math) = caps.get(3) {
                self.out.push_str(&format!("$${}$$", math.as_str()));
            }
            last = whole.end();
        }
        self.plain(&decoded[last..]);
    }

    /// Ordinary text: whitespace collapses and Markdown emphasis characters
    /// are escaped.
    fn plain(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                if !(self.out.is_empty() || self.out.ends_with([' ', '\n'])) {
                    self.out.push(' ');
                }
                continue;
            }
            if self.code == 0 && matches!(ch, '*' | '_' | '`') {
                self.out.push('\\');
            }
            self.out.push(ch);
        }
    }

    fn sound(&mut self, name: &str) {
        let kind = MediaKind::from_extension(name).unwrap_or(MediaKind::Audio);
        let id = self.media.len();
        let reference = MediaReference::new(id, kind, name.trim());
        self.out.push_str(&reference.placeholder);
        self.media.push(reference);
    }

    fn image(&mut self, tag: &Tag) {
        let src = tag.attr("src").unwrap_or("").trim();
        if is_external(src) {
            let alt = tag.attr("alt").unwrap_or("");
            self.out.push_str(&format!("![{alt}]({src})"));
        } else {
            self.reference(src, MediaKind::Image, tag);
        }
    }

    /// Record a reference to a packaged file and emit its placeholder.
    fn reference(&mut self, src: &str, kind: MediaKind, tag: &Tag) -> Option<usize> {
        let id = self.record(src, kind, tag)?;
        self.out.push_str(&self.media[id].placeholder);
        Some(id)
    }

    fn record(&mut self, src: &str, kind: MediaKind, tag: &Tag) -> Option<usize> {
        let src = src.trim();
        if src.is_empty() || is_external(src) {
            return None;
        }
        let id = self.media.len();
        let mut reference = MediaReference::new(id, kind, src);
        let attr = |name: &str| tag.attr(name).map(str::to_string).filter(|s| !s.is_empty());
        reference.width = attr("width");
        reference.height = attr("height");
        reference.alt = attr("alt");
        self.media.push(reference);
        Some(id)
    }

    fn table(&mut self, tokens: &[Token<'a>]) {
        let layout = table::layout(tokens);
        let shape = layout.shape;
        if shape.is_simple(&self.config.table_thresholds) && self.config.convert_simple_tables {
            let rows = self.cell_texts(tokens, &layout.rows);
            self.ensure_blank_line();
            self.out.push_str(&table::render_pipe(&rows));
            self.ensure_blank_line();
            self.stats.tables_converted += 1;
        } else if self.config.preserve_complex_tables {
            let html = self.verbatim(tokens);
            self.ensure_blank_line();
            self.out.push_str(&html);
            self.ensure_blank_line();
            self.preserved.push(html);
            self.stats.tables_preserved += 1;
        } else {
            let lines: Vec<String> = self
                .cell_texts(tokens, &layout.rows)
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .filter(|text| !text.is_empty())
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .filter(|line| !line.is_empty())
                .collect();
            self.ensure_blank_line();
            self.out.push_str(&lines.join("\n"));
            self.ensure_blank_line();
            self.warnings.push(format!(
                "flattened a {}x{} table that cannot be represented as a pipe table",
                shape.rows, shape.columns
            ));
            self.stats.tables_flattened += 1;
        }
    }

    fn cell_texts(&mut self, tokens: &[Token<'a>], rows: &[Vec<Range<usize>>]) -> Vec<Vec<String>> {
        let mut texts = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(row.len());
            for cell in row {
                let content = self.fragment(&tokens[cell.clone()]);
                cells.push(table::cell_text(&content));
            }
            texts.push(cells);
        }
        texts
    }

    /// Convert a run of tokens on its own, sharing the media list.
    fn fragment(&mut self, tokens: &[Token<'a>]) -> String {
        let out = std::mem::take(&mut self.out);
        let frames = std::mem::take(&mut self.frames);
        let lists = std::mem::take(&mut self.lists);
        let parent = self.media_parent.take();
        self.run(tokens);
        self.close_all();
        self.hidden = None;
        let text = std::mem::replace(&mut self.out, out);
        self.frames = frames;
        self.lists = lists;
        self.media_parent = parent;
        text
    }

    /// The table's original markup with media sources swapped for
    /// placeholders.
    fn verbatim(&mut self, tokens: &[Token<'a>]) -> String {
        let input = self.input;
        let mut html = String::new();
        for token in tokens {
            let raw = &input[token.span.clone()];
            match &token.kind {
                TokenKind::Start(tag)
                    if matches!(tag.name.as_str(), "img" | "audio" | "video" | "source") =>
                {
                    let kind = match tag.name.as_str() {
                        "img" => MediaKind::Image,
                        "video" => MediaKind::Video,
                        "audio" => MediaKind::Audio,
                        _ => tag
                            .attr("src")
                            .and_then(MediaKind::from_extension)
                            .unwrap_or(MediaKind::Audio),
                    };
                    match tag.attr("src").and_then(|src| self.record(src, kind, tag)) {
                        Some(id) => html.push_str(&rebuild_tag(tag, &src_placeholder(id))),
                        None => html.push_str(raw),
                    }
                }
                TokenKind::Text(_) => {
                    let replaced = SOUND_TAG.replace_all(raw, |caps: &Captures<'_>| {
                        let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                        let kind = MediaKind::from_extension(name).unwrap_or(MediaKind::Audio);
                        let id = self.media.len();
                        let reference = MediaReference::new(id, kind, name.trim());
                        let placeholder = reference.placeholder.clone();
                        self.media.push(reference);
                        placeholder
                    });
                    html.push_str(&replaced);
                }
                _ => html.push_str(raw),
            }
        }
        html
    }

    fn trim_trailing_spaces(&mut self) {
        let len = self.out.trim_end_matches([' ', '\t']).len();
        self.out.truncate(len);
        for frame in &mut self.frames {
            frame.start = frame.start.min(len);
        }
    }

    fn ensure_newline(&mut self) {
        self.trim_trailing_spaces();
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn ensure_blank_line(&mut self) {
        self.ensure_newline();
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }
}

/// Split leading and trailing whitespace off `s`.
fn split_padding(s: &str) -> (&str, &str, &str) {
    let trimmed_start = s.trim_start();
    let lead = &s[..s.len() - trimmed_start.len()];
    let text = trimmed_start.trim_end();
    let trail = &trimmed_start[text.len()..];
    (lead, text, trail)
}

/// Put `marker` around the text of each line, keeping surrounding
/// whitespace outside the delimiters.
fn wrap_lines(inner: &str, marker: &str) -> String {
    inner
        .split('\n')
        .map(|line| {
            let (lead, text, trail) = split_padding(line);
            if text.is_empty() {
                line.to_string()
            } else {
                format!("{lead}{marker}{text}{marker}{trail}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Re-emit a start tag with its `src` replaced.
fn rebuild_tag(tag: &Tag, src: &str) -> String {
    let mut out = format!("<{}", tag.name);
    for (name, value) in &tag.attrs {
        let value = if name == "src" { src } else { value.as_str() };
        out.push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
    }
    if tag.self_closing {
        out.push_str(" /");
    }
    out.push('>');
    out
}
