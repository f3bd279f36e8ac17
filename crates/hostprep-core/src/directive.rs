//! Line-level reading and editing of `Keyword value` configuration files.
//!
//! The format is the one sshd uses: one directive per line, keyword first
//! (matched case-insensitively), then whitespace or `=` and the value. Blank
//! lines and `#` comments are ignored. A `Match` line opens a conditional
//! block that runs to the end of the file; only the global section before it
//! is read or edited.

/// One declaration of a directive inside a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclLine {
    /// 1-based line number.
    pub line: usize,
    pub value: String,
}

struct Parsed<'a> {
    indent: &'a str,
    keyword: &'a str,
    sep: &'a str,
    value: &'a str,
}

fn parse(line: &str) -> Option<Parsed<'_>> {
    let body = line.trim_end_matches(['\n', '\r']);
    let trimmed = body.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let indent = &body[..body.len() - trimmed.len()];
    let kw_end = trimmed
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(trimmed.len());
    let keyword = &trimmed[..kw_end];
    let rest = &trimmed[kw_end..];
    let mut seen_eq = false;
    let sep_end = rest
        .find(|c: char| {
            if c == '=' && !seen_eq {
                seen_eq = true;
                false
            } else {
                !c.is_whitespace()
            }
        })
        .unwrap_or(rest.len());
    Some(Parsed {
        indent,
        keyword,
        sep: &rest[..sep_end],
        value: rest[sep_end..].trim_end(),
    })
}

fn is_match_block(p: &Parsed<'_>) -> bool {
    p.keyword.eq_ignore_ascii_case("Match")
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Whether a declared value already equals the desired one.
pub fn same_value(declared: &str, desired: &str) -> bool {
    unquote(declared).eq_ignore_ascii_case(unquote(desired))
}

/// Every declaration of `directive` in the global section of `text`.
pub fn scan(text: &str, directive: &str) -> Vec<DeclLine> {
    let mut found = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(p) = parse(line) else { continue };
        if is_match_block(&p) {
            break;
        }
        if p.keyword.eq_ignore_ascii_case(directive) {
            found.push(DeclLine {
                line: idx + 1,
                value: unquote(p.value).to_owned(),
            });
        }
    }
    found
}

/// Rewrite every conflicting declaration of `directive` to `value`.
///
/// Indentation, keyword spelling, separator and line endings are kept; all
/// other lines are returned byte for byte. `None` when nothing conflicts.
pub fn rewrite(text: &str, directive: &str, value: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + value.len());
    let mut changed = false;
    let mut global = true;
    for line in text.split_inclusive('\n') {
        let parsed = if global { parse(line) } else { None };
        match parsed {
            Some(p) if is_match_block(&p) => {
                global = false;
                out.push_str(line);
            }
            Some(p) if p.keyword.eq_ignore_ascii_case(directive) && !same_value(p.value, value) => {
                let eol = &line[line.trim_end_matches(['\n', '\r']).len()..];
                let sep = if p.sep.is_empty() { " " } else { p.sep };
                out.push_str(p.indent);
                out.push_str(p.keyword);
                out.push_str(sep);
                out.push_str(value);
                out.push_str(eol);
                changed = true;
            }
            _ => out.push_str(line),
        }
    }
    changed.then_some(out)
}

/// Add a `directive value` line to the end of the global section.
pub fn append(text: &str, directive: &str, value: &str) -> String {
    let decl = format!("{directive} {value}\n");
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if parse(line).is_some_and(|p| is_match_block(&p)) {
            let mut out = String::with_capacity(text.len() + decl.len());
            out.push_str(&text[..offset]);
            out.push_str(&decl);
            out.push_str(&text[offset..]);
            return out;
        }
        offset += line.len();
    }
    let mut out = text.to_owned();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&decl);
    out
}
