//! Ordered syntactic passes applied to the SQL text restored from the AST.
//! Every pass tracks quote state, so string literals and quoted identifiers
//! are never touched, and every word match checks word boundaries.

use crate::rewrite::IdentityHint;
use itertools::Itertools;

pub fn postprocess(sql: &str, hint: IdentityHint) -> String {
    let s = replace_backticks(sql);
    let s = type_touchups(&s);
    let s = strip_table_options(&s);
    let s = strip_charset_prefixes(&s);
    let s = unique_key_to_unique(&s);
    let s = strip_bare_datetime_parens(&s);
    let s = auto_increment_to_serial(&s);
    let s = insert_null_to_default(&s, hint);
    let s = limit_comma_swap(&s);
    let s = replace_phrase(&s, &["LOCK", "IN", "SHARE", "MODE"], "FOR SHARE");
    let s = rewrite_empty_call(&s, "LAST_INSERT_ID", "lastval()");
    let s = rewrite_empty_call(&s, "UNIX_TIMESTAMP", "EXTRACT(EPOCH FROM CURRENT_TIMESTAMP)");
    let s = match_against_to_tsquery(&s);
    placeholders_to_dollar(&s)
}

/// Highest `$n` in the finished statement, which is the parameter count.
pub fn max_dollar_param(sql: &str) -> u16 {
    let mask = literal_mask(sql);
    let b = sql.as_bytes();
    let mut max = 0u16;
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'$' && !mask[i] {
            let mut j = i + 1;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                if let Ok(n) = sql[i + 1..j].parse::<u16>() {
                    max = max.max(n);
                }
            }
            i = j;
        } else {
            i += 1;
        }
    }
    max
}

/// Pre-parse normalization for MySQL constructs the parser's grammar cannot
/// represent. Both have matching (then idle) passes in `postprocess`.
pub fn prenormalize(sql: &str) -> String {
    let s = replace_phrase(sql, &["LOCK", "IN", "SHARE", "MODE"], "FOR SHARE");
    group_concat_separator_to_comma(&s)
}

/// `GROUP_CONCAT(x SEPARATOR ';')` → `GROUP_CONCAT(x, ';')`, which parses
/// as a two-argument call and later renames to STRING_AGG.
fn group_concat_separator_to_comma(s: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (idx, t) in toks.iter().enumerate() {
        if !t.is_word("GROUP_CONCAT") || !toks.get(idx + 1).map_or(false, |n| n.is_sym('(')) {
            continue;
        }
        let Some(close) = matching_paren(&toks, idx + 1) else {
            continue;
        };
        let mut depth = 0usize;
        for inner in &toks[idx + 1..close] {
            if inner.is_sym('(') {
                depth += 1;
            } else if inner.is_sym(')') {
                depth -= 1;
            } else if depth == 1 && inner.is_word("SEPARATOR") {
                edits.push(Edit {
                    start: with_leading_ws(s, inner.start),
                    end: inner.end,
                    text: ",".to_string(),
                });
            }
        }
    }
    apply_edits(s, edits)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Per-byte flag: inside a single-quoted string (backslash escapes and ''
/// doubling), a double-quoted identifier, or a backtick identifier.
fn literal_mask(s: &str) -> Vec<bool> {
    let b = s.as_bytes();
    let mut mask = vec![false; b.len()];
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' => i = mask_span(b, &mut mask, i, b'\'', true),
            b'"' => i = mask_span(b, &mut mask, i, b'"', false),
            b'`' => i = mask_span(b, &mut mask, i, b'`', false),
            _ => i += 1,
        }
    }
    mask
}

fn mask_span(b: &[u8], mask: &mut [bool], start: usize, quote: u8, backslash: bool) -> usize {
    let mut i = start;
    mask[i] = true;
    i += 1;
    while i < b.len() {
        mask[i] = true;
        if backslash && b[i] == b'\\' {
            if i + 1 < b.len() {
                mask[i + 1] = true;
            }
            i += 2;
            continue;
        }
        if b[i] == quote {
            if i + 1 < b.len() && b[i + 1] == quote {
                mask[i + 1] = true;
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokKind {
    Word,
    Number,
    Str,
    QuotedIdent,
    Sym,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Tok<'a> {
    pub(crate) text: &'a str,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) kind: TokKind,
}

impl<'a> Tok<'a> {
    pub(crate) fn is_word(&self, w: &str) -> bool {
        self.kind == TokKind::Word && self.text.eq_ignore_ascii_case(w)
    }

    pub(crate) fn is_sym(&self, c: char) -> bool {
        self.kind == TokKind::Sym && self.text.len() == 1 && self.text.as_bytes()[0] == c as u8
    }

    /// Identifier text with its quoting (backtick or double quote) removed.
    pub(crate) fn ident_text(&self) -> Option<String> {
        match self.kind {
            TokKind::Word | TokKind::Number => Some(self.text.to_string()),
            TokKind::QuotedIdent if self.text.len() >= 2 => {
                let quote = self.text.chars().next()?;
                let inner = &self.text[1..self.text.len() - 1];
                let doubled: String = [quote, quote].into_iter().collect();
                Some(inner.replace(&doubled, &quote.to_string()))
            }
            _ => None,
        }
    }
}

fn scan_quoted(b: &[u8], start: usize, quote: u8, backslash: bool) -> usize {
    let mut i = start + 1;
    while i < b.len() {
        if backslash && b[i] == b'\\' {
            i += 2;
            continue;
        }
        if b[i] == quote {
            if i + 1 < b.len() && b[i + 1] == quote {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

pub(crate) fn tokenize(s: &str) -> Vec<Tok<'_>> {
    let b = s.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let kind = match c {
            b'\'' => {
                i = scan_quoted(b, i, b'\'', true);
                TokKind::Str
            }
            b'"' => {
                i = scan_quoted(b, i, b'"', false);
                TokKind::QuotedIdent
            }
            b'`' => {
                i = scan_quoted(b, i, b'`', false);
                TokKind::QuotedIdent
            }
            c if is_word_byte(c) => {
                while i < b.len() && is_word_byte(b[i]) {
                    i += 1;
                }
                if b[start..i].iter().all(|c| c.is_ascii_digit()) {
                    TokKind::Number
                } else {
                    TokKind::Word
                }
            }
            _ => {
                let char_len = s[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                i += char_len;
                TokKind::Sym
            }
        };
        toks.push(Tok {
            text: &s[start..i],
            start,
            end: i,
            kind,
        });
    }
    toks
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

fn apply_edits(s: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = s.to_string();
    for e in edits {
        out.replace_range(e.start..e.end, &e.text);
    }
    out
}

/// Extend a removal span left over the whitespace run that preceded it so
/// deletions do not leave doubled spaces behind.
fn with_leading_ws(s: &str, start: usize) -> usize {
    let b = s.as_bytes();
    let mut start = start;
    while start > 0 && b[start - 1].is_ascii_whitespace() {
        start -= 1;
    }
    start
}

/// Backticks become double quotes; the restorer cannot be subverted to emit
/// them itself.
fn replace_backticks(s: &str) -> String {
    let b = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' => {
                let end = scan_quoted(b, i, b'\'', true);
                out.push_str(&s[i..end]);
                i = end;
            }
            b'"' => {
                let end = scan_quoted(b, i, b'"', false);
                out.push_str(&s[i..end]);
                i = end;
            }
            b'`' => {
                let end = scan_quoted(b, i, b'`', false);
                let inner_end = if end > i + 1 && b[end - 1] == b'`' {
                    end - 1
                } else {
                    end
                };
                let inner = &s[i + 1..inner_end];
                out.push('"');
                out.push_str(&inner.replace("``", "`").replace('"', "\"\""));
                out.push('"');
                i = end;
            }
            _ => {
                // copy everything up to the next quote wholesale
                let next = b[i..]
                    .iter()
                    .position(|&c| c == b'\'' || c == b'"' || c == b'`')
                    .map(|p| i + p)
                    .unwrap_or(b.len());
                out.push_str(&s[i..next]);
                i = next;
            }
        }
    }
    out
}

/// Type names the AST pass cannot reach, replaced whole-word on the text.
fn type_touchups(s: &str) -> String {
    const MAP: &[(&str, &str)] = &[
        ("TINYBLOB", "BYTEA"),
        ("MEDIUMBLOB", "BYTEA"),
        ("LONGBLOB", "BYTEA"),
        ("BLOB", "BYTEA"),
        ("TINYTEXT", "TEXT"),
        ("MEDIUMTEXT", "TEXT"),
        ("LONGTEXT", "TEXT"),
        ("JSON", "JSONB"),
    ];
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (idx, t) in toks.iter().enumerate() {
        if t.kind != TokKind::Word {
            continue;
        }
        if let Some((_, to)) = MAP
            .iter()
            .find(|(from, _)| t.text.eq_ignore_ascii_case(from))
        {
            edits.push(Edit {
                start: t.start,
                end: t.end,
                text: (*to).to_string(),
            });
            continue;
        }
        // DOUBLE → DOUBLE PRECISION, unless PRECISION already follows
        if t.is_word("DOUBLE") && !toks.get(idx + 1).map_or(false, |n| n.is_word("PRECISION")) {
            edits.push(Edit {
                start: t.start,
                end: t.end,
                text: "DOUBLE PRECISION".to_string(),
            });
        }
    }
    apply_edits(s, edits)
}

fn is_value_token(t: &Tok<'_>) -> bool {
    matches!(
        t.kind,
        TokKind::Word | TokKind::Number | TokKind::Str | TokKind::QuotedIdent
    )
}

/// Remove trailing MySQL-only table options and column charset clutter:
/// `ENGINE=…`, `[DEFAULT] CHARSET=…`, `[DEFAULT] CHARACTER SET [=] …`,
/// `COLLATE[=] …`, `COMMENT[=] '…'`, `ROW_FORMAT=…`, `AUTO_INCREMENT=N`.
fn strip_table_options(s: &str) -> String {
    let toks = tokenize(s);
    let mut edits: Vec<Edit> = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        let t = &toks[i];
        // (first, last) token index of the option keyword itself
        let (mut start_idx, key_end_idx) = if t.is_word("CHARACTER")
            && toks.get(i + 1).map_or(false, |n| n.is_word("SET"))
        {
            (i, i + 1)
        } else if t.is_word("ENGINE")
            || t.is_word("CHARSET")
            || t.is_word("COLLATE")
            || t.is_word("ROW_FORMAT")
            || t.is_word("COMMENT")
        {
            (i, i)
        } else if t.is_word("AUTO_INCREMENT") && toks.get(i + 1).map_or(false, |n| n.is_sym('=')) {
            (i, i)
        } else {
            i += 1;
            continue;
        };
        // swallow a DEFAULT right before CHARSET / CHARACTER SET
        if (t.is_word("CHARSET") || t.is_word("CHARACTER"))
            && start_idx > 0
            && toks[start_idx - 1].is_word("DEFAULT")
        {
            start_idx -= 1;
        }
        let mut end_idx = key_end_idx;
        if toks.get(end_idx + 1).map_or(false, |n| n.is_sym('=')) {
            end_idx += 1;
        }
        if toks.get(end_idx + 1).map_or(false, is_value_token) {
            end_idx += 1;
        }
        edits.push(Edit {
            start: with_leading_ws(s, toks[start_idx].start),
            end: toks[end_idx].end,
            text: String::new(),
        });
        i = end_idx + 1;
    }
    apply_edits(s, edits)
}

/// `_utf8mb4'…'` / `_latin1'…'` / `_binary'…'` → `'…'`
fn strip_charset_prefixes(s: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (t, next) in toks.iter().tuple_windows() {
        if t.kind == TokKind::Word
            && t.text.starts_with('_')
            && t.text.len() > 1
            && next.kind == TokKind::Str
            && t.end == next.start
        {
            edits.push(Edit {
                start: t.start,
                end: t.end,
                text: String::new(),
            });
        }
    }
    apply_edits(s, edits)
}

/// Defense in depth beyond the AST constraint filter.
fn unique_key_to_unique(s: &str) -> String {
    let s = replace_phrase(s, &["UNIQUE", "KEY"], "UNIQUE");
    replace_phrase(&s, &["UNIQUE", "INDEX"], "UNIQUE")
}

fn replace_phrase(s: &str, words: &[&str], to: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    let mut i = 0;
    while i + words.len() <= toks.len() {
        if words
            .iter()
            .enumerate()
            .all(|(k, w)| toks[i + k].is_word(w))
        {
            edits.push(Edit {
                start: toks[i].start,
                end: toks[i + words.len() - 1].end,
                text: to.to_string(),
            });
            i += words.len();
        } else {
            i += 1;
        }
    }
    apply_edits(s, edits)
}

/// `CURRENT_TIMESTAMP()` → `CURRENT_TIMESTAMP`, likewise CURRENT_DATE and
/// CURRENT_TIME.
fn strip_bare_datetime_parens(s: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (idx, t) in toks.iter().enumerate() {
        if (t.is_word("CURRENT_TIMESTAMP") || t.is_word("CURRENT_DATE") || t.is_word("CURRENT_TIME"))
            && toks.get(idx + 1).map_or(false, |n| n.is_sym('('))
            && toks.get(idx + 2).map_or(false, |n| n.is_sym(')'))
        {
            edits.push(Edit {
                start: t.end,
                end: toks[idx + 2].end,
                text: String::new(),
            });
        }
    }
    apply_edits(s, edits)
}

/// `FN()` → replacement, whole-word, only for an empty argument list.
fn rewrite_empty_call(s: &str, name: &str, to: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (idx, t) in toks.iter().enumerate() {
        if t.is_word(name)
            && toks.get(idx + 1).map_or(false, |n| n.is_sym('('))
            && toks.get(idx + 2).map_or(false, |n| n.is_sym(')'))
        {
            edits.push(Edit {
                start: t.start,
                end: toks[idx + 2].end,
                text: to.to_string(),
            });
        }
    }
    apply_edits(s, edits)
}

/// `INT AUTO_INCREMENT` → `SERIAL` (and BIGINT/SMALLINT to their serials).
/// The base type may be separated from the attribute by other column
/// attributes; search back to the start of the column definition.
fn auto_increment_to_serial(s: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (idx, t) in toks.iter().enumerate() {
        if !t.is_word("AUTO_INCREMENT") {
            continue;
        }
        if toks.get(idx + 1).map_or(false, |n| n.is_sym('=')) {
            continue; // table option, handled by the option strip
        }
        let mut serial = None;
        for back in (0..idx).rev() {
            let b = &toks[back];
            if b.is_sym(',') || b.is_sym('(') {
                break;
            }
            serial = if b.is_word("INT") || b.is_word("INTEGER") {
                Some((back, "SERIAL"))
            } else if b.is_word("BIGINT") {
                Some((back, "BIGSERIAL"))
            } else if b.is_word("SMALLINT") {
                Some((back, "SMALLSERIAL"))
            } else {
                serial
            };
            if serial.is_some() {
                break;
            }
        }
        match serial {
            Some((type_idx, serial_name)) => {
                edits.push(Edit {
                    start: toks[type_idx].start,
                    end: toks[type_idx].end,
                    text: serial_name.to_string(),
                });
                edits.push(Edit {
                    start: with_leading_ws(s, t.start),
                    end: t.end,
                    text: String::new(),
                });
            }
            None => edits.push(Edit {
                start: with_leading_ws(s, t.start),
                end: t.end,
                text: String::new(),
            }),
        }
    }
    apply_edits(s, edits)
}

/// `INSERT … VALUES (NULL, …)` → `… VALUES (DEFAULT, …)` when the target's
/// first column is (or may be) an identity column.
fn insert_null_to_default(s: &str, hint: IdentityHint) -> String {
    if hint == IdentityHint::NoIdentity {
        return s.to_string();
    }
    let toks = tokenize(s);
    if !toks.first().map_or(false, |t| t.is_word("INSERT")) {
        return s.to_string();
    }
    let Some(values_idx) = toks.iter().position(|t| t.is_word("VALUES")) else {
        return s.to_string();
    };
    let mut edits = Vec::new();
    let mut depth = 0usize;
    let mut idx = values_idx + 1;
    while idx < toks.len() {
        let t = &toks[idx];
        if t.is_sym('(') {
            depth += 1;
            if depth == 1 {
                if let Some(first) = toks.get(idx + 1) {
                    if first.is_word("NULL") {
                        edits.push(Edit {
                            start: first.start,
                            end: first.end,
                            text: "DEFAULT".to_string(),
                        });
                    }
                }
            }
        } else if t.is_sym(')') {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && t.kind == TokKind::Word {
            // ON CONFLICT / RETURNING etc. end the VALUES list
            break;
        }
        idx += 1;
    }
    apply_edits(s, edits)
}

/// `LIMIT offset, count` → `LIMIT count OFFSET offset`; fires only for two
/// positive integer literals separated by a comma.
fn limit_comma_swap(s: &str) -> String {
    let toks = tokenize(s);
    let mut edits = Vec::new();
    for (idx, t) in toks.iter().enumerate() {
        if !t.is_word("LIMIT") {
            continue;
        }
        let (Some(a), Some(comma), Some(b)) = (toks.get(idx + 1), toks.get(idx + 2), toks.get(idx + 3))
        else {
            continue;
        };
        if a.kind == TokKind::Number && comma.is_sym(',') && b.kind == TokKind::Number {
            edits.push(Edit {
                start: t.start,
                end: b.end,
                text: format!("LIMIT {} OFFSET {}", b.text, a.text),
            });
        }
    }
    apply_edits(s, edits)
}

/// `MATCH(col[, col…]) AGAINST('term' [IN … MODE])` →
/// `to_tsvector('simple', col1 || ' ' || col2 …) @@ to_tsquery('simple', 'term')`
fn match_against_to_tsquery(s: &str) -> String {
    let mut out = s.to_string();
    loop {
        let toks = tokenize(&out);
        let mut replaced = false;
        'scan: for (idx, t) in toks.iter().enumerate() {
            if !t.is_word("MATCH") || !toks.get(idx + 1).map_or(false, |n| n.is_sym('(')) {
                continue;
            }
            let Some(cols_close) = matching_paren(&toks, idx + 1) else {
                continue;
            };
            let against_idx = cols_close + 1;
            if !toks.get(against_idx).map_or(false, |n| n.is_word("AGAINST"))
                || !toks.get(against_idx + 1).map_or(false, |n| n.is_sym('('))
            {
                continue;
            }
            let Some(term_close) = matching_paren(&toks, against_idx + 1) else {
                continue;
            };
            // the search term is the first string literal inside AGAINST();
            // the mode suffix is discarded
            let Some(term) = toks[against_idx + 2..term_close]
                .iter()
                .find(|t| t.kind == TokKind::Str)
            else {
                continue;
            };
            let columns = split_top_level_commas(&out, &toks, idx + 2, cols_close);
            if columns.is_empty() {
                continue;
            }
            let vector = columns.iter().join(" || ' ' || ");
            let replacement = format!(
                "to_tsvector('simple', {vector}) @@ to_tsquery('simple', {term})",
                term = term.text
            );
            let start = t.start;
            let end = toks[term_close].end;
            out.replace_range(start..end, &replacement);
            replaced = true;
            break 'scan;
        }
        if !replaced {
            return out;
        }
    }
}

/// Index of the `)` closing the `(` at `open_idx`, in token space.
fn matching_paren(toks: &[Tok<'_>], open_idx: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, t) in toks.iter().enumerate().skip(open_idx) {
        if t.is_sym('(') {
            depth += 1;
        } else if t.is_sym(')') {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn split_top_level_commas(s: &str, toks: &[Tok<'_>], from: usize, to: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut seg_start = toks.get(from).map(|t| t.start);
    for t in &toks[from..to] {
        if t.is_sym('(') {
            depth += 1;
        } else if t.is_sym(')') {
            depth = depth.saturating_sub(1);
        } else if t.is_sym(',') && depth == 0 {
            if let Some(start) = seg_start {
                out.push(s[start..t.start].trim().to_string());
            }
            seg_start = Some(t.end);
        }
    }
    if let (Some(start), Some(last)) = (seg_start, toks.get(to)) {
        let seg = s[start..last.start].trim();
        if !seg.is_empty() {
            out.push(seg.to_string());
        }
    }
    out
}

/// `?` → `$n` in lexical order, honoring string-literal boundaries.
fn placeholders_to_dollar(s: &str) -> String {
    let mask = literal_mask(s);
    let b = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut n = 0u32;
    let mut copied_to = 0usize;
    for i in 0..b.len() {
        if b[i] == b'?' && !mask[i] {
            out.push_str(&s[copied_to..i]);
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
            copied_to = i + 1;
        }
    }
    out.push_str(&s[copied_to..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::IdentityHint;

    fn pp(sql: &str) -> String {
        postprocess(sql, IdentityHint::Unknown)
    }

    #[test]
    fn test_backticks_become_double_quotes() {
        assert_eq!(pp("SELECT `a` FROM `t`"), "SELECT \"a\" FROM \"t\"");
        // a backtick inside a string literal is data
        assert_eq!(pp("SELECT '`' FROM `t`"), "SELECT '`' FROM \"t\"");
    }

    #[test]
    fn test_type_touchups_whole_word() {
        assert_eq!(pp("x BLOB"), "x BYTEA");
        assert_eq!(pp("x TINYTEXT, y MEDIUMTEXT, z LONGTEXT"), "x TEXT, y TEXT, z TEXT");
        assert_eq!(pp("x JSON"), "x JSONB");
        assert_eq!(pp("x DOUBLE"), "x DOUBLE PRECISION");
        assert_eq!(pp("x DOUBLE PRECISION"), "x DOUBLE PRECISION");
        // identifiers survive
        assert_eq!(pp("SELECT longtext_col, json_payload FROM t"),
                   "SELECT longtext_col, json_payload FROM t");
        assert_eq!(pp("SELECT `double_field` FROM t"), "SELECT \"double_field\" FROM t");
        assert_eq!(pp("SELECT 'BLOB JSON DOUBLE'"), "SELECT 'BLOB JSON DOUBLE'");
    }

    #[test]
    fn test_postprocess_idempotent() {
        let inputs = [
            "CREATE TABLE `t` (`id` INT AUTO_INCREMENT PRIMARY KEY, `n` VARCHAR(100)) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            "SELECT * FROM `t` LIMIT 5, 10",
            "SELECT `a` FROM `d` WHERE MATCH(`a`) AGAINST('x' IN BOOLEAN MODE)",
            "x DOUBLE, y JSON, z BLOB",
        ];
        for input in inputs {
            let once = pp(input);
            // the placeholder pass numbers `?`; running the remaining passes
            // twice must not change anything
            let twice = pp(&once);
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_strip_table_options() {
        let sql = "CREATE TABLE \"t\" (\"id\" INTEGER) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin COMMENT='users' ROW_FORMAT=DYNAMIC AUTO_INCREMENT=42";
        assert_eq!(pp(sql), "CREATE TABLE \"t\" (\"id\" INTEGER)");
        assert_eq!(
            pp("CREATE TABLE t (x VARCHAR(5) CHARACTER SET utf8)"),
            "CREATE TABLE t (x VARCHAR(5))"
        );
    }

    #[test]
    fn test_strip_charset_literal_prefixes() {
        assert_eq!(pp("SELECT _utf8mb4'abc'"), "SELECT 'abc'");
        assert_eq!(pp("SELECT _latin1'x', _binary'y'"), "SELECT 'x', 'y'");
        // no adjacency, no strip
        assert_eq!(pp("SELECT _utf8mb4 'abc'"), "SELECT _utf8mb4 'abc'");
    }

    #[test]
    fn test_unique_key_tokens() {
        assert_eq!(pp("UNIQUE KEY (\"a\")"), "UNIQUE (\"a\")");
        assert_eq!(pp("UNIQUE INDEX (\"a\")"), "UNIQUE (\"a\")");
    }

    #[test]
    fn test_current_timestamp_paren_strip() {
        assert_eq!(
            pp("ts TIMESTAMP DEFAULT CURRENT_TIMESTAMP()"),
            "ts TIMESTAMP DEFAULT CURRENT_TIMESTAMP"
        );
        assert_eq!(pp("SELECT CURRENT_DATE(), CURRENT_TIME()"), "SELECT CURRENT_DATE, CURRENT_TIME");
    }

    #[test]
    fn test_auto_increment_serial_family() {
        assert_eq!(
            pp("\"id\" INT AUTO_INCREMENT PRIMARY KEY"),
            "\"id\" SERIAL PRIMARY KEY"
        );
        assert_eq!(pp("\"id\" BIGINT AUTO_INCREMENT"), "\"id\" BIGSERIAL");
        assert_eq!(pp("\"id\" SMALLINT AUTO_INCREMENT"), "\"id\" SMALLSERIAL");
        assert_eq!(
            pp("\"id\" INTEGER NOT NULL AUTO_INCREMENT"),
            "\"id\" SERIAL NOT NULL"
        );
    }

    #[test]
    fn test_insert_null_to_default() {
        assert_eq!(
            postprocess(
                "INSERT INTO \"t\" VALUES (NULL, 'a')",
                IdentityHint::FirstColumn
            ),
            "INSERT INTO \"t\" VALUES (DEFAULT, 'a')"
        );
        // positively no identity column: leave the NULL alone
        assert_eq!(
            postprocess(
                "INSERT INTO \"t\" VALUES (NULL, 'a')",
                IdentityHint::NoIdentity
            ),
            "INSERT INTO \"t\" VALUES (NULL, 'a')"
        );
        // conservative mode applies at position 0
        assert_eq!(
            pp("INSERT INTO \"t\" VALUES (NULL, 'a'), (NULL, 'b')"),
            "INSERT INTO \"t\" VALUES (DEFAULT, 'a'), (DEFAULT, 'b')"
        );
        // NULL elsewhere is untouched
        assert_eq!(
            pp("INSERT INTO \"t\" VALUES ('a', NULL)"),
            "INSERT INTO \"t\" VALUES ('a', NULL)"
        );
    }

    #[test]
    fn test_limit_comma_swap() {
        assert_eq!(pp("SELECT * FROM t LIMIT 5, 10"), "SELECT * FROM t LIMIT 10 OFFSET 5");
        assert_eq!(pp("SELECT * FROM t LIMIT 10"), "SELECT * FROM t LIMIT 10");
        assert_eq!(
            pp("SELECT * FROM t LIMIT 10 OFFSET 5"),
            "SELECT * FROM t LIMIT 10 OFFSET 5"
        );
        // not two integer literals: leave alone
        assert_eq!(pp("SELECT * FROM t LIMIT x, 10"), "SELECT * FROM t LIMIT x, 10");
    }

    #[test]
    fn test_lock_and_last_insert_id() {
        assert_eq!(
            pp("SELECT * FROM t FOR UPDATE"),
            "SELECT * FROM t FOR UPDATE"
        );
        assert_eq!(
            pp("SELECT * FROM t LOCK IN SHARE MODE"),
            "SELECT * FROM t FOR SHARE"
        );
        assert_eq!(pp("SELECT LAST_INSERT_ID()"), "SELECT lastval()");
        assert_eq!(
            pp("SELECT UNIX_TIMESTAMP()"),
            "SELECT EXTRACT(EPOCH FROM CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn test_match_against_single_column() {
        assert_eq!(
            pp("SELECT \"title\" FROM \"docs\" WHERE MATCH(\"title\") AGAINST('MySQL')"),
            "SELECT \"title\" FROM \"docs\" WHERE to_tsvector('simple', \"title\") @@ to_tsquery('simple', 'MySQL')"
        );
    }

    #[test]
    fn test_match_against_multi_column_modes() {
        for mode in ["IN BOOLEAN MODE", "IN NATURAL LANGUAGE MODE"] {
            let sql = format!(
                "SELECT \"title\" FROM \"docs\" WHERE MATCH (\"title\", \"content\") AGAINST ('MySQL' {mode})"
            );
            let rewritten = pp(&sql);
            assert_eq!(
                rewritten,
                "SELECT \"title\" FROM \"docs\" WHERE to_tsvector('simple', \"title\" || ' ' || \"content\") @@ to_tsquery('simple', 'MySQL')"
            );
            assert_eq!(rewritten.matches("@@").count(), 1);
        }
    }

    #[test]
    fn test_match_against_preserves_term_bytes() {
        let rewritten = pp("SELECT a FROM d WHERE MATCH(a) AGAINST('+MySQL -Oracle' IN BOOLEAN MODE)");
        assert!(rewritten.contains("to_tsquery('simple', '+MySQL -Oracle')"));
    }

    #[test]
    fn test_placeholders_lexical_order() {
        assert_eq!(
            pp("INSERT INTO t (a, b) VALUES (?, ?)"),
            "INSERT INTO t (a, b) VALUES ($1, $2)"
        );
        // a '?' inside a string literal is not a placeholder
        assert_eq!(
            pp("SELECT * FROM t WHERE a = '?' AND b = ? AND c = \"?\" AND d = ?"),
            "SELECT * FROM t WHERE a = '?' AND b = $1 AND c = \"?\" AND d = $2"
        );
        assert_eq!(
            pp(r"SELECT * FROM t WHERE a = 'x\'?' AND b = ?"),
            r"SELECT * FROM t WHERE a = 'x\'?' AND b = $1"
        );
    }

    #[test]
    fn test_max_dollar_param() {
        assert_eq!(max_dollar_param("SELECT $1, $2, $11"), 11);
        assert_eq!(max_dollar_param("SELECT '$9', $2"), 2);
        assert_eq!(max_dollar_param("SELECT 1"), 0);
    }

    #[test]
    fn test_identifier_vs_keyword_distinction() {
        // a table with columns named like keywords keeps them intact
        let sql = "CREATE TABLE \"test_indexes\" (\"id\" INTEGER PRIMARY KEY, \"indexes\" VARCHAR(100), \"my_key_field\" VARCHAR(50))";
        assert_eq!(pp(sql), sql);
    }
}
