// Shared character-level scanning for both the filter grammar and the
// QL stage-splitting pass. Kept separate from the filter parser
// because the QL parser's "find the extent of an embedded filter
// clause" step needs the same string/paren-aware scanning without
// needing a full token stream.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String, bool), // (text, case_insensitive suffix present)
    Int(i64),
    Real(f64),
    Op(CompareOpTok),
    LParen,
    RParen,
    Comma,
    Pipe,
    Star,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOpTok {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '\'' | '"' => {
                let (s, consumed) = read_quoted(&chars[i..], c)?;
                i += consumed;
                let case_insensitive = i < chars.len() && chars[i] == 'i' && is_flag_boundary(&chars, i);
                if case_insensitive {
                    i += 1;
                }
                tokens.push(Token::Str(s, case_insensitive));
            }
            '=' | '!' | '<' | '>' => {
                let (op, consumed) = read_operator(&chars[i..])?;
                tokens.push(Token::Op(op));
                i += consumed;
            }
            '-' | '0'..='9' => {
                let (tok, consumed) = read_number(&chars[i..]);
                tokens.push(tok);
                i += consumed;
            }
            _ => {
                let (ident, consumed) = read_ident(&chars[i..]);
                if ident.is_empty() {
                    return Err(format!("unexpected character '{}'", c));
                }
                tokens.push(Token::Ident(ident));
                i += consumed;
            }
        }
    }

    Ok(tokens)
}

fn is_flag_boundary(chars: &[char], flag_pos: usize) -> bool {
    match chars.get(flag_pos + 1) {
        None => true,
        Some(c) => !c.is_alphanumeric() && *c != '_',
    }
}

fn read_quoted(rest: &[char], quote: char) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut i = 1; // skip opening quote
    while i < rest.len() {
        let c = rest[i];
        if c == '\\' && i + 1 < rest.len() {
            let escaped = rest[i + 1];
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                _ => escaped,
            });
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err("unterminated string literal".to_string())
}

fn read_operator(rest: &[char]) -> Result<(CompareOpTok, usize), String> {
    let two: String = rest.iter().take(2).collect();
    match two.as_str() {
        "==" => Ok((CompareOpTok::Eq, 2)),
        "!=" => Ok((CompareOpTok::Ne, 2)),
        "<=" => Ok((CompareOpTok::Le, 2)),
        ">=" => Ok((CompareOpTok::Ge, 2)),
        "=~" => Ok((CompareOpTok::Match, 2)),
        "!~" => Ok((CompareOpTok::NotMatch, 2)),
        _ => match rest[0] {
            '<' => Ok((CompareOpTok::Lt, 1)),
            '>' => Ok((CompareOpTok::Gt, 1)),
            other => Err(format!("unexpected operator character '{}'", other)),
        },
    }
}

fn read_number(rest: &[char]) -> (Token, usize) {
    let mut i = 0;
    if rest[0] == '-' {
        i += 1;
    }
    while i < rest.len() && rest[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_real = false;
    if i < rest.len() && rest[i] == '.' && rest.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        is_real = true;
        i += 1;
        while i < rest.len() && rest[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text: String = rest[..i].iter().collect();
    if is_real {
        (Token::Real(text.parse().unwrap_or(0.0)), i)
    } else {
        (Token::Int(text.parse().unwrap_or(0)), i)
    }
}

fn read_ident(rest: &[char]) -> (String, usize) {
    let mut i = 0;
    while i < rest.len() {
        let c = rest[i];
        if c.is_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '-' {
            i += 1;
        } else {
            break;
        }
    }
    (rest[..i].iter().collect(), i)
}

/// Find the byte offset in `input` of the first occurrence, at paren
/// depth zero and outside quoted strings, of a word-delimited
/// occurrence of any keyword in `stop_words` (case-insensitive). Used
/// by the QL parser to find where an embedded filter clause ends.
/// A boundary is whitespace, `(`, `)`, `,`, or end of input.
pub fn find_stop_keyword(input: &str, stop_words: &[&str]) -> Option<usize> {
    let chars: Vec<char> = input.chars().collect();
    let mut byte_offsets: Vec<usize> = Vec::with_capacity(chars.len() + 1);
    {
        let mut acc = 0;
        for c in &chars {
            byte_offsets.push(acc);
            acc += c.len_utf8();
        }
        byte_offsets.push(acc);
    }

    let mut depth = 0i32;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '(' {
            depth += 1;
            i += 1;
            continue;
        }
        if c == ')' {
            depth -= 1;
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            if let Ok((_, consumed)) = read_quoted(&chars[i..], c) {
                i += consumed;
            } else {
                i += 1;
            }
            continue;
        }
        if depth == 0 && is_word_start(&chars, i) {
            for word in stop_words {
                if matches_word_at(&chars, i, word) {
                    return Some(byte_offsets[i]);
                }
            }
        }
        i += 1;
    }
    None
}

/// Split `input` on `delim` at paren depth zero and outside quoted
/// strings. Used for stage lists (`|`), aggregation-function lists,
/// `IN`/group-by field lists, and similar flat top-level lists in the
/// QL grammar.
pub fn split_top_level(input: &str, delim: char) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut depth = 0i32;
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '(' {
            depth += 1;
            current.push(c);
            i += 1;
            continue;
        }
        if c == ')' {
            depth -= 1;
            current.push(c);
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            if let Ok((s, consumed)) = read_quoted(&chars[i..], c) {
                current.push(c);
                current.push_str(&s);
                current.push(c);
                i += consumed;
                continue;
            }
        }
        if depth == 0 && c == delim {
            parts.push(std::mem::take(&mut current));
            i += 1;
            continue;
        }
        current.push(c);
        i += 1;
    }
    parts.push(current);
    parts
}

/// If `text` (after trimming leading whitespace) starts with `word` as
/// a whole word (case-insensitive), return the remainder following it
/// (not yet trimmed). Otherwise `None`.
pub fn strip_keyword<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let trimmed = text.trim_start();
    let offset = text.len() - trimmed.len();
    let chars: Vec<char> = trimmed.chars().collect();
    if matches_word_at(&chars, 0, word) {
        let wlen = word.chars().count();
        let byte_len: usize = chars[..wlen].iter().map(|c| c.len_utf8()).sum();
        Some(&text[offset + byte_len..])
    } else {
        None
    }
}

fn is_word_start(chars: &[char], pos: usize) -> bool {
    pos == 0 || !(chars[pos - 1].is_alphanumeric() || chars[pos - 1] == '_')
}

fn matches_word_at(chars: &[char], pos: usize, word: &str) -> bool {
    let wchars: Vec<char> = word.chars().collect();
    if pos + wchars.len() > chars.len() {
        return false;
    }
    for (offset, wc) in wchars.iter().enumerate() {
        if chars[pos + offset].to_ascii_lowercase() != wc.to_ascii_lowercase() {
            return false;
        }
    }
    match chars.get(pos + wchars.len()) {
        None => true,
        Some(c) => matches!(c, ' ' | '\t' | '\n' | '\r' | '(' | ')' | ',' | '|' | '*'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_with_keyword_at_depth_zero() {
        let q = "kind == log with kind == network within 100ms";
        let pos = find_stop_keyword(q, &["with"]).unwrap();
        assert_eq!(&q[pos..pos + 4], "with");
    }

    #[test]
    fn ignores_keyword_inside_parens() {
        let q = "(a == \"with\") where b == 1";
        let pos = find_stop_keyword(q, &["where"]).unwrap();
        assert_eq!(&q[pos..pos + 5], "where");
    }

    #[test]
    fn ignores_keyword_inside_string() {
        let q = "msg == \"contains where in it\" where x == 1";
        let pos = find_stop_keyword(q, &["where"]).unwrap();
        assert_eq!(&q[pos..], "where x == 1");
    }
}
