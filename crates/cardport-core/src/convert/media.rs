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

use std::fmt::Display;
use std::fmt::Formatter;

use percent_encoding::AsciiSet;
use percent_encoding::CONTROLS;
use percent_encoding::utf8_percent_encode;
use serde::Deserialize;
use serde::Serialize;

use crate::convert::html::escape_attr;

const IMAGE_EXTENSIONS: [&str; 11] = [
    "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "avif", "tif", "tiff", "ico",
];
const AUDIO_EXTENSIONS: [&str; 9] = ["mp3", "wav", "ogg", "oga", "m4a", "flac", "aac", "opus", "spx"];
const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "webm", "mkv", "mov", "avi", "ogv", "m4v", "mpg"];

/// Characters that would end a Markdown link destination early.
const LINK_UNSAFE: &AsciiSet = &CONTROLS.add(b' ').add(b'(').add(b')').add(b'<').add(b'>');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_extension(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// How resolved media is written into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaReferenceFormat {
    /// Markdown image and link syntax.
    #[default]
    Link,
    /// Inline HTML media elements.
    Embed,
}

/// A media file mentioned by a field, standing in the output as a
/// placeholder until the file has been stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaReference {
    /// Position in the field's reference list.
    pub id: usize,
    pub kind: MediaKind,
    /// The filename as written in the field.
    pub source: String,
    pub placeholder: String,
    pub width: Option<String>,
    pub height: Option<String>,
    pub alt: Option<String>,
}

impl MediaReference {
    pub fn new(id: usize, kind: MediaKind, source: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            source: source.into(),
            placeholder: placeholder(id),
            width: None,
            height: None,
            alt: None,
        }
    }

    /// Render the reference pointing at `path`.
    pub fn render(&self, path: &str, format: MediaReferenceFormat) -> String {
        match format {
            MediaReferenceFormat::Link => {
                let dest = utf8_percent_encode(path, LINK_UNSAFE);
                match self.kind {
                    MediaKind::Image | MediaKind::Audio => {
                        format!("![{}]({dest})", self.alt.as_deref().unwrap_or(""))
                    }
                    MediaKind::Video => {
                        let name = path.rsplit('/').next().unwrap_or(path);
                        format!("[{name}]({dest})")
                    }
                }
            }
            MediaReferenceFormat::Embed => {
                let src = escape_attr(path);
                match self.kind {
                    MediaKind::Image => {
                        let mut tag = format!("<img src=\"{src}\"");
                        for (name, value) in [
                            ("alt", &self.alt),
                            ("width", &self.width),
                            ("height", &self.height),
                        ] {
                            if let Some(value) = value {
                                tag.push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
                            }
                        }
                        tag.push('>');
                        tag
                    }
                    MediaKind::Audio => format!("<audio controls src=\"{src}\"></audio>"),
                    MediaKind::Video => format!("<video controls src=\"{src}\"></video>"),
                }
            }
        }
    }
}

/// Placeholder standing for a rendered reference in Markdown output.
pub fn placeholder(id: usize) -> String {
    format!("{{{{media:{id}}}}}")
}

/// Placeholder standing for a bare path inside preserved HTML.
pub fn src_placeholder(id: usize) -> String {
    format!("{{{{media-src:{id}}}}}")
}

/// Sources that are not files in the package.
pub fn is_external(src: &str) -> bool {
    let lower = src.trim_start().to_ascii_lowercase();
    ["http://", "https://", "data:", "//", "file:"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}
