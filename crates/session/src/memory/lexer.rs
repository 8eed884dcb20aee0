//! Tokenizer for the in-memory server's SQL subset

use super::error::Failure;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Bare identifier or keyword
    Word(String),
    /// `quoted` or "quoted" identifier
    Quoted(String),
    /// 'string literal'
    Str(String),
    /// Unsigned numeric literal, kept as written
    Number(String),
    /// Single punctuation character
    Symbol(char),
}

impl Token {
    /// True for a bare word equal to `keyword`, ignoring case
    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// Text used in syntax error messages
    pub(crate) fn text(&self) -> String {
        match self {
            Token::Word(w) | Token::Number(w) => w.clone(),
            Token::Quoted(q) => q.clone(),
            Token::Str(s) => format!("'{}'", s),
            Token::Symbol(c) => c.to_string(),
        }
    }
}

pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>, Failure> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '\'' => {
                let (text, next) = quoted(&chars, i, '\'')?;
                tokens.push(Token::Str(text));
                i = next;
            }
            '`' | '"' => {
                let (text, next) = quoted(&chars, i, c)?;
                tokens.push(Token::Quoted(text));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' || c == '@' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '@'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            '(' | ')' | ',' | '=' | '*' | ';' | '.' | '<' | '>' | '!' | '+' | '-' | '/' | '%' => {
                tokens.push(Token::Symbol(c));
                i += 1;
            }
            other => return Err(Failure::Syntax(other.to_string())),
        }
    }
    Ok(tokens)
}

/// Read a quoted run starting at `start`; a doubled quote is an escaped quote
fn quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize), Failure> {
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(Failure::Syntax(chars[start..].iter().collect())),
            Some(&c) if c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    text.push(quote);
                    i += 2;
                } else {
                    return Ok((text, i + 1));
                }
            }
            Some(&c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}
