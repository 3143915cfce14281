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

//! HTML field content to Markdown.
//!
//! Conversion is a pure function of the input and the [`ConversionConfig`].
//! Media files are not touched here: each reference is left in the output as
//! a placeholder, and [`ConversionResult::resolve_media`] substitutes the
//! stored paths once the media has been deduplicated.

pub mod cloze;
pub mod html;
pub mod media;
pub mod table;
mod writer;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Captures;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::convert::cloze::ClozeMarkerFormat;
use crate::convert::media::MediaReference;
use crate::convert::media::MediaReferenceFormat;
use crate::convert::table::TableThresholds;
use crate::convert::writer::Writer;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{media(-src)?:(\d+)\}\}").expect("media placeholder pattern to compile")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Keep tables that are too complex for a pipe table as HTML. When off,
    /// they are flattened to one line per row.
    pub preserve_complex_tables: bool,
    pub convert_simple_tables: bool,
    pub media_format: MediaReferenceFormat,
    pub cloze: ClozeMarkerFormat,
    /// Keep `span`/`font` styling as inline HTML instead of unwrapping it.
    pub preserve_styles: bool,
    pub table_thresholds: TableThresholds,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            preserve_complex_tables: true,
            convert_simple_tables: true,
            media_format: MediaReferenceFormat::default(),
            cloze: ClozeMarkerFormat::default(),
            preserve_styles: false,
            table_thresholds: TableThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConversionStats {
    pub input_len: usize,
    pub output_len: usize,
    pub media_count: usize,
    pub cloze_count: usize,
    pub tables_converted: usize,
    pub tables_preserved: usize,
    pub tables_flattened: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    /// Markdown with media placeholders.
    pub markdown: String,
    pub media: Vec<MediaReference>,
    /// HTML kept as is, such as complex tables.
    pub preserved: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: ConversionStats,
    pub media_format: MediaReferenceFormat,
}

impl ConversionResult {
    /// Substitute stored paths, keyed by reference id, for the placeholders.
    /// References without a path fall back to their original filename.
    pub fn resolve_media(&self, paths: &BTreeMap<usize, String>) -> String {
        PLACEHOLDER
            .replace_all(&self.markdown, |caps: &Captures<'_>| {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
                let Some(reference) = caps
                    .get(2)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .and_then(|id| self.media.get(id))
                else {
                    return whole.to_string();
                };
                let path = paths
                    .get(&reference.id)
                    .map(String::as_str)
                    .unwrap_or(reference.source.as_str());
                if caps.get(1).is_some() {
                    path.to_string()
                } else {
                    reference.render(path, self.media_format)
                }
            })
            .into_owned()
    }
}

/// Convert one field's HTML into Markdown.
pub fn convert(input: &str, config: &ConversionConfig) -> ConversionResult {
    let tokens = html::tokenize(input);
    let mut writer = Writer::new(input, config);
    let raw = writer.write_all(&tokens);
    let (markdown, cloze_count) = cloze::remap(&tidy(&raw), &config.cloze);
    let mut stats = writer.stats;
    stats.input_len = input.len();
    stats.output_len = markdown.len();
    stats.media_count = writer.media.len();
    stats.cloze_count = cloze_count;
    ConversionResult {
        markdown,
        media: writer.media,
        preserved: writer.preserved,
        warnings: writer.warnings,
        stats,
        media_format: config.media_format,
    }
}

/// Strip trailing whitespace, collapse runs of blank lines and trim.
fn tidy(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank = false;
    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if blank {
                continue;
            }
            blank = true;
        } else {
            blank = false;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use pulldown_cmark::Event;
    use pulldown_cmark::Options;
    use pulldown_cmark::Parser;
    use pulldown_cmark::Tag;

    use super::*;
    use crate::convert::media::MediaKind;

    fn md(input: &str) -> String {
        convert(input, &ConversionConfig::default()).markdown
    }

    #[test]
    fn test_inline_formatting() {
        assert_eq!(md("<b>bold</b> and <i>it</i>"), "**bold** and *it*");
        assert_eq!(md("<strong>x</strong><em>y</em>"), "**x***y*");
        assert_eq!(md("<s>gone</s> <code>a_b</code>"), "~~gone~~ `a_b`");
        assert_eq!(md("H<sub>2</sub>O <u>u</u>"), "H<sub>2</sub>O <u>u</u>");
    }

    #[test]
    fn test_whitespace_moves_outside_markers() {
        assert_eq!(md("a<b> bold </b>b"), "a **bold** b");
        assert_eq!(md("<b> </b>x"), "x");
    }

    #[test]
    fn test_escapes_markdown_characters() {
        assert_eq!(md("2*3 = snake_case `x`"), r"2\*3 = snake\_case \`x\`");
    }

    #[test]
    fn test_entities() {
        assert_eq!(md("a &lt; b &amp;&amp; c&nbsp;d"), "a < b && c d");
    }

    #[test]
    fn test_blocks() {
        assert_eq!(md("<div>one</div><div>two</div>"), "one\ntwo");
        assert_eq!(md("<p>one</p><p>two</p>"), "one\n\ntwo");
        assert_eq!(md("one<br>two<br/><br><br>three"), "one\ntwo\n\nthree");
        assert_eq!(md("<h2>Title  here</h2>text"), "## Title here\n\ntext");
        assert_eq!(md("a<hr>b"), "a\n\n---\n\nb");
        assert_eq!(md("<blockquote>quoted<br>text</blockquote>"), "> quoted\n> text");
    }

    #[test]
    fn test_lists() {
        assert_eq!(md("<ul><li>a</li><li>b</li></ul>"), "- a\n- b");
        assert_eq!(md("<ol><li>a</li><li>b</li></ol>"), "1. a\n2. b");
        assert_eq!(
            md("<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul>"),
            "- a\n  - b\n- c"
        );
    }

    #[test]
    fn test_pre() {
        assert_eq!(
            md("<pre>fn main() {\n    x_y();\n}</pre>"),
            "```\nfn main() {\n    x_y();\n}\n```"
        );
    }

    #[test]
    fn test_links() {
        assert_eq!(
            md(r#"see <a href="https://example.com">the site</a>"#),
            "see [the site](https://example.com)"
        );
        assert_eq!(md("<a>plain</a>"), "plain");
    }

    #[test]
    fn test_styles() {
        let input = r#"<span style="color: red">red</span>"#;
        assert_eq!(md(input), "red");
        let config = ConversionConfig {
            preserve_styles: true,
            ..ConversionConfig::default()
        };
        assert_eq!(convert(input, &config).markdown, input);
    }

    #[test]
    fn test_hidden_content() {
        assert_eq!(md("<style>.x { color: red }</style>visible"), "visible");
    }

    #[test]
    fn test_mathjax() {
        assert_eq!(md(r"\(x_1^2\) and \[a*b\]"), "$x_1^2$ and $$a*b$$");
    }

    #[test]
    fn test_media_references() {
        let result = convert(
            r#"<img src="cat.jpg" alt="cat" width="50"> hi [sound:meow.mp3]"#,
            &ConversionConfig::default(),
        );
        assert_eq!(result.markdown, "{{media:0}} hi {{media:1}}");
        assert_eq!(result.media.len(), 2);
        assert_eq!(result.media[0].kind, MediaKind::Image);
        assert_eq!(result.media[0].source, "cat.jpg");
        assert_eq!(result.media[0].alt.as_deref(), Some("cat"));
        assert_eq!(result.media[0].width.as_deref(), Some("50"));
        assert_eq!(result.media[1].kind, MediaKind::Audio);
        assert_eq!(result.media[1].source, "meow.mp3");
        assert_eq!(result.stats.media_count, 2);
    }

    #[test]
    fn test_audio_with_sources() {
        let result = convert(
            r#"<audio controls><source src="a.ogg"><source src="a.mp3">fallback</audio>"#,
            &ConversionConfig::default(),
        );
        assert_eq!(result.markdown, "{{media:0}}");
        assert_eq!(result.media.len(), 1);
        assert_eq!(result.media[0].source, "a.ogg");
    }

    #[test]
    fn test_external_images_are_not_references() {
        let result = convert(
            r#"<img src="https://example.com/a.png" alt="remote">"#,
            &ConversionConfig::default(),
        );
        assert_eq!(result.markdown, "![remote](https://example.com/a.png)");
        assert!(result.media.is_empty());
    }

    #[test]
    fn test_resolve_media() {
        let result = convert(
            r#"<img src="cat.jpg"> <img src="gone.png">"#,
            &ConversionConfig::default(),
        );
        let mut paths = BTreeMap::new();
        paths.insert(0, "deck/cat.jpg".to_string());
        assert_eq!(
            result.resolve_media(&paths),
            "![](deck/cat.jpg) ![](gone.png)"
        );
    }

    #[test]
    fn test_resolve_media_embed() {
        let config = ConversionConfig {
            media_format: MediaReferenceFormat::Embed,
            ..ConversionConfig::default()
        };
        let result = convert("[sound:a.mp3]", &config);
        let mut paths = BTreeMap::new();
        paths.insert(0, "deck/a.mp3".to_string());
        assert_eq!(
            result.resolve_media(&paths),
            r#"<audio controls src="deck/a.mp3"></audio>"#
        );
    }

    fn parses_as_table(markdown: &str) -> bool {
        Parser::new_ext(markdown, Options::ENABLE_TABLES)
            .any(|event| matches!(event, Event::Start(Tag::Table(_))))
    }

    #[test]
    fn test_simple_table_becomes_pipe_table() {
        let input = "<table><tr><th>Country</th><th>Capital</th></tr>\
                     <tr><td>France</td><td><b>Paris</b></td></tr>\
                     <tr><td>Spain</td><td>Madrid</td></tr></table>";
        let result = convert(input, &ConversionConfig::default());
        assert_eq!(
            result.markdown,
            "| Country | Capital |\n| --- | --- |\n| France | **Paris** |\n| Spain | Madrid |"
        );
        assert_eq!(result.stats.tables_converted, 1);
        assert!(parses_as_table(&result.markdown));
    }

    #[test]
    fn test_wide_table_is_preserved() {
        let input = "<table><tr><td>1</td><td>2</td><td>3</td><td>4</td><td>5</td></tr></table>";
        let result = convert(input, &ConversionConfig::default());
        assert_eq!(result.markdown, input);
        assert_eq!(result.preserved, vec![input.to_string()]);
        assert_eq!(result.stats.tables_preserved, 1);
        assert!(!parses_as_table(&result.markdown));
    }

    #[test]
    fn test_merged_cells_are_preserved() {
        let input = r#"<table><tr><td colspan="2">a</td></tr><tr><td>b</td><td>c</td></tr></table>"#;
        let result = convert(input, &ConversionConfig::default());
        assert_eq!(result.markdown, input);
    }

    #[test]
    fn test_huge_colspan_is_preserved() {
        let input = r#"<table><tr><td>a</td><td colspan="18446744073709551615">b</td></tr></table>"#;
        let result = convert(input, &ConversionConfig::default());
        assert_eq!(result.markdown, input);
        assert_eq!(result.stats.tables_preserved, 1);
    }

    #[test]
    fn test_preserved_table_media_uses_src_placeholder() {
        let input = r#"<table><tr><td colspan="2"><img src="map.png"></td></tr></table>"#;
        let result = convert(input, &ConversionConfig::default());
        assert_eq!(
            result.markdown,
            r#"<table><tr><td colspan="2"><img src="{{media-src:0}}"></td></tr></table>"#
        );
        let mut paths = BTreeMap::new();
        paths.insert(0, "geo/map.png".to_string());
        assert!(result.resolve_media(&paths).contains(r#"<img src="geo/map.png">"#));
    }

    #[test]
    fn test_complex_table_flattened_when_not_preserving() {
        let config = ConversionConfig {
            preserve_complex_tables: false,
            ..ConversionConfig::default()
        };
        let input = r#"<table><tr><td colspan="2">a</td></tr><tr><td>b</td><td>c</td></tr></table>"#;
        let result = convert(input, &config);
        assert_eq!(result.markdown, "a\nb | c");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.stats.tables_flattened, 1);
    }

    #[test]
    fn test_simple_table_kept_when_conversion_disabled() {
        let config = ConversionConfig {
            convert_simple_tables: false,
            ..ConversionConfig::default()
        };
        let input = "<table><tr><td>a</td><td>b</td></tr></table>";
        assert_eq!(convert(input, &config).markdown, input);
    }

    #[test]
    fn test_cloze_numbering() {
        let config = ConversionConfig {
            cloze: ClozeMarkerFormat {
                marker: "[{text}]^{n}".to_string(),
                hinted_marker: "[{text}|{hint}]^{n}".to_string(),
            },
            ..ConversionConfig::default()
        };
        let result = convert("{{c1::a}} {{c2::<b>b</b>}}", &config);
        assert_eq!(result.markdown, "[a]^1 [**b**]^2");
        assert_eq!(result.stats.cloze_count, 2);
    }

    #[test]
    fn test_deterministic() {
        let input = r#"<div>Q: <b>x</b> <img src="a.png"></div><table><tr><td>1</td></tr></table>"#;
        let config = ConversionConfig::default();
        assert_eq!(convert(input, &config), convert(input, &config));
    }

    #[test]
    fn test_stats() {
        let result = convert("<b>hi</b>", &ConversionConfig::default());
        assert_eq!(result.stats.input_len, 9);
        assert_eq!(result.stats.output_len, 6);
    }

    #[test]
    fn test_config_defaults_fill_missing_keys() -> crate::error::Fallible<()> {
        let config: ConversionConfig = serde_json::from_str(
            r#"{"media_format": "embed", "table_thresholds": {"max_columns": 6}}"#,
        )?;
        assert_eq!(config.media_format, MediaReferenceFormat::Embed);
        assert_eq!(config.table_thresholds.max_columns, 6);
        assert_eq!(config.table_thresholds.max_rows, 5);
        assert!(config.preserve_complex_tables);
        Ok(())
    }
}
