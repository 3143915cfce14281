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

use serde::Deserialize;
use serde::Serialize;

use crate::convert::html::Token;
use crate::convert::html::TokenKind;

/// Limits under which a table counts as simple enough for a pipe table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableThresholds {
    pub max_columns: usize,
    pub max_rows: usize,
    pub allow_merged_cells: bool,
}

impl Default for TableThresholds {
    fn default() -> Self {
        Self {
            max_columns: 3,
            max_rows: 5,
            allow_merged_cells: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableShape {
    pub rows: usize,
    /// Widest row, counting `colspan`.
    pub columns: usize,
    /// Some cell spans more than one row or column.
    pub merged: bool,
    pub nested: bool,
}

impl TableShape {
    pub fn is_simple(&self, limits: &TableThresholds) -> bool {
        self.rows > 0
            && self.columns <= limits.max_columns
            && self.rows <= limits.max_rows
            && (limits.allow_merged_cells || !self.merged)
            && !self.nested
    }
}

/// Index of the token closing the table opened at `tokens[start]`, or the
/// last token if it is never closed.
pub fn matching_end(tokens: &[Token<'_>], start: usize) -> usize {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(start) {
        match &token.kind {
            TokenKind::Start(tag) if tag.name == "table" => depth += 1,
            TokenKind::End(name) if name == "table" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx;
                }
            }
            _ => {}
        }
    }
    tokens.len().saturating_sub(1)
}

/// A table's rows, each a list of cells, each cell the token range of its
/// content. Only cells of the outermost table are listed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableLayout {
    pub shape: TableShape,
    pub rows: Vec<Vec<Range<usize>>>,
}

/// Lay out the table spanning `tokens`, which starts with its `<table>`.
pub fn layout(tokens: &[Token<'_>]) -> TableLayout {
    let mut rows: Vec<Vec<Range<usize>>> = Vec::new();
    let mut widths: Vec<usize> = Vec::new();
    let mut cell: Option<usize> = None;
    let mut depth = 0usize;
    let mut shape = TableShape::default();

    fn close(cell: &mut Option<usize>, rows: &mut [Vec<Range<usize>>], idx: usize) {
        if let (Some(start), Some(row)) = (cell.take(), rows.last_mut()) {
            row.push(start..idx);
        }
    }

    for (idx, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Start(tag) if tag.name == "table" => {
                depth += 1;
                if depth > 1 {
                    shape.nested = true;
                }
            }
            TokenKind::End(name) if name == "table" => {
                if depth == 1 {
                    close(&mut cell, &mut rows, idx);
                }
                depth = depth.saturating_sub(1);
            }
            TokenKind::Start(tag) if depth == 1 && tag.name == "tr" => {
                close(&mut cell, &mut rows, idx);
                rows.push(Vec::new());
                widths.push(0);
            }
            TokenKind::Start(tag) if depth == 1 && (tag.name == "td" || tag.name == "th") => {
                close(&mut cell, &mut rows, idx);
                if rows.is_empty() {
                    rows.push(Vec::new());
                    widths.push(0);
                }
                let colspan = tag.span_attr("colspan");
                if colspan > 1 || tag.span_attr("rowspan") > 1 {
                    shape.merged = true;
                }
                if let Some(width) = widths.last_mut() {
                    *width = width.saturating_add(colspan.max(1));
                }
                cell = Some(idx + 1);
            }
            TokenKind::End(name) if depth == 1 && matches!(name.as_str(), "td" | "th" | "tr") => {
                close(&mut cell, &mut rows, idx);
            }
            _ => {}
        }
    }
    close(&mut cell, &mut rows, tokens.len());

    let mut kept = Vec::new();
    let mut columns = 0;
    for (row, width) in rows.into_iter().zip(widths) {
        if !row.is_empty() {
            columns = columns.max(width);
            kept.push(row);
        }
    }
    shape.rows = kept.len();
    shape.columns = columns;
    TableLayout { shape, rows: kept }
}

/// Make converted cell content fit on one pipe-table line.
pub fn cell_text(content: &str) -> String {
    content
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("<br>")
        .replace('|', "\\|")
}

/// Render rows of cell text as a pipe table. The first row is the header.
pub fn render_pipe(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let line = |row: &[String]| {
        let mut s = String::from("|");
        for idx in 0..columns {
            s.push(' ');
            s.push_str(row.get(idx).map(String::as_str).unwrap_or(""));
            s.push_str(" |");
        }
        s
    };
    let mut out = Vec::with_capacity(rows.len() + 1);
    let mut iter = rows.iter();
    if let Some(header) = iter.next() {
        out.push(line(header));
        out.push(format!("|{}", " --- |".repeat(columns)));
    }
    for row in iter {
        out.push(line(row));
    }
    out.join("\n")
}
