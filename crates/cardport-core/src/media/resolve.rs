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


use percent_encoding::percent_decode_str;

use crate::convert::media::is_external;
use crate::package::MediaSource;

/// Decode percent-encoded characters (e.g., %20 to space).
fn percent_decode(s: &str) -> Option<String> {
    percent_decode_str(s)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// Errors that can occur when resolving a media reference.
#[derive(Debug, PartialEq)]
pub enum ResolveError {
    /// Name is the empty string.
    Empty,
    /// Name is an external URL.
    ExternalUrl,
    /// No blob by that name is bundled in the package.
    NotFound,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ResolveError::Empty => "media name is the empty string.",
            ResolveError::ExternalUrl => "external URLs are not package media.",
            ResolveError::NotFound => "media file is not in the package.",
        };
        write!(f, "{msg}")
    }
}

/// Resolve a media name as written in a field to the name the package
/// stores it under.
///
/// If the name is not found as written, percent-encoded characters are
/// decoded and the lookup is retried.
pub fn resolve_name<S: MediaSource + ?Sized>(source: &S, name: &str) -> Result<String, ResolveError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ResolveError::Empty);
    }
    if is_external(name) || name.contains("://") {
        return Err(ResolveError::ExternalUrl);
    }
    if source.contains(name) {
        return Ok(name.to_string());
    }
    match percent_decode(name) {
        Some(decoded) if decoded != name && source.contains(&decoded) => Ok(decoded),
        _ => Err(ResolveError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fallible;
    use crate::fixtures::MemoryMediaSource;

    fn index() -> Fallible<MemoryMediaSource> {
        Ok(MemoryMediaSource::new()
            .with("cat.jpg", b"meow")
            .with("my sound.mp3", b"ID3"))
    }

    #[test]
    fn test_exact() -> Fallible<()> {
        assert_eq!(resolve_name(&index()?, "cat.jpg"), Ok("cat.jpg".to_string()));
        Ok(())
    }

    #[test]
    fn test_percent_decoded_fallback() -> Fallible<()> {
        assert_eq!(
            resolve_name(&index()?, "my%20sound.mp3"),
            Ok("my sound.mp3".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_empty() -> Fallible<()> {
        assert_eq!(resolve_name(&index()?, "  "), Err(ResolveError::Empty));
        Ok(())
    }

    #[test]
    fn test_external() -> Fallible<()> {
        assert_eq!(
            resolve_name(&index()?, "https://example.com/cat.jpg"),
            Err(ResolveError::ExternalUrl)
        );
        Ok(())
    }

    #[test]
    fn test_missing() -> Fallible<()> {
        assert_eq!(resolve_name(&index()?, "dog.jpg"), Err(ResolveError::NotFound));
        Ok(())
    }
}
