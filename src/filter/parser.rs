// Recursive-descent parser for the filter grammar.
//
// Precedence low to high: OR, AND, NOT, atom. Atoms are
// `path OP literal`, with `IN` taking a parenthesized literal list.

use super::ast::{CompareOp, CompiledRegex, FilterExpr, FilterPredicate, Literal};
use super::lexer::{tokenize, CompareOpTok, Token};
use crate::error::QlError;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(word))
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = FilterExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, String> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = FilterExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<FilterExpr, String> {
        if self.eat_keyword("not") {
            let inner = self.parse_not()?;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<FilterExpr, String> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let inner = self.parse_or()?;
            match self.advance() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err("expected ')' closing group".to_string()),
            }
        }

        let path = match self.advance() {
            Some(Token::Ident(s)) => s,
            other => return Err(format!("expected field path, found {:?}", other)),
        };

        if self.eat_keyword("in") {
            return self.parse_in(path);
        }

        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            other => return Err(format!("expected comparison operator after '{}', found {:?}", path, other)),
        };

        if matches!(op, CompareOpTok::Match | CompareOpTok::NotMatch) {
            let (pattern, ci) = match self.advance() {
                Some(Token::Str(s, ci)) => (s, ci),
                other => return Err(format!("expected regex string literal, found {:?}", other)),
            };
            let source = if ci { format!("(?i){}", pattern) } else { pattern.clone() };
            let regex = regex::Regex::new(&source)
                .map_err(|e| format!("invalid regex /{}/ : {}", pattern, e))?;
            return Ok(FilterExpr::Match {
                path,
                regex: CompiledRegex { source: pattern, regex },
                negated: matches!(op, CompareOpTok::NotMatch),
            });
        }

        let literal = self.parse_literal()?;
        let cmp = match op {
            CompareOpTok::Eq => CompareOp::Eq,
            CompareOpTok::Ne => CompareOp::Ne,
            CompareOpTok::Lt => CompareOp::Lt,
            CompareOpTok::Le => CompareOp::Le,
            CompareOpTok::Gt => CompareOp::Gt,
            CompareOpTok::Ge => CompareOp::Ge,
            CompareOpTok::Match | CompareOpTok::NotMatch => unreachable!(),
        };
        Ok(FilterExpr::Compare { path, op: cmp, literal })
    }

    fn parse_in(&mut self, path: String) -> Result<FilterExpr, String> {
        match self.advance() {
            Some(Token::LParen) => {}
            other => return Err(format!("expected '(' after IN, found {:?}", other)),
        }
        let mut list = Vec::new();
        loop {
            list.push(self.parse_literal()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => return Err(format!("expected ',' or ')' in IN list, found {:?}", other)),
            }
        }
        Ok(FilterExpr::In { path, list })
    }

    fn parse_literal(&mut self) -> Result<Literal, String> {
        match self.advance() {
            Some(Token::Str(s, _)) => Ok(Literal::Str(s)),
            Some(Token::Int(i)) => Ok(Literal::Int(i)),
            Some(Token::Real(r)) => Ok(Literal::Real(r)),
            Some(Token::Ident(s)) => Ok(Literal::Str(s)),
            other => Err(format!("expected literal, found {:?}", other)),
        }
    }
}

impl FilterPredicate {
    /// Compile a filter expression. Fails at compile time
    /// (`QlError::InvalidFilter`) when the expression does not parse
    /// or a regex fails to compile; never fails at evaluation time.
    pub fn compile(source: &str) -> Result<FilterPredicate, QlError> {
        let tokens = tokenize(source).map_err(QlError::InvalidFilter)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or().map_err(QlError::InvalidFilter)?;
        if parser.pos != parser.tokens.len() {
            return Err(QlError::InvalidFilter(format!(
                "unexpected trailing input in filter expression: {:?}",
                &parser.tokens[parser.pos..]
            )));
        }
        Ok(FilterPredicate { expr, source: source.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind};
    use serde_json::json;

    fn ev(payload: serde_json::Value) -> Event {
        Event::new(EventKind::Log, 1, None, payload)
    }

    #[test]
    fn compiles_simple_equality() {
        let p = FilterPredicate::compile("level == \"ERROR\"").unwrap();
        assert!(p.eval(&ev(json!({"level": "ERROR"}))));
        assert!(!p.eval(&ev(json!({"level": "WARN"}))));
    }

    #[test]
    fn and_or_not_precedence() {
        let p = FilterPredicate::compile("level == \"ERROR\" and service == \"api\" or level == \"WARN\"").unwrap();
        assert!(p.eval(&ev(json!({"level": "ERROR", "service": "api"}))));
        assert!(p.eval(&ev(json!({"level": "WARN", "service": "db"}))));
        assert!(!p.eval(&ev(json!({"level": "ERROR", "service": "db"}))));
    }

    #[test]
    fn not_and_parens() {
        let p = FilterPredicate::compile("not (level == \"ERROR\")").unwrap();
        assert!(!p.eval(&ev(json!({"level": "ERROR"}))));
        assert!(p.eval(&ev(json!({"level": "WARN"}))));
    }

    #[test]
    fn in_list() {
        let p = FilterPredicate::compile("port IN (80, 443, 8080)").unwrap();
        assert!(p.eval(&ev(json!({"port": 443}))));
        assert!(!p.eval(&ev(json!({"port": 22}))));
    }

    #[test]
    fn regex_case_insensitive() {
        let p = FilterPredicate::compile("message =~ \"error\"i").unwrap();
        assert!(p.eval(&ev(json!({"message": "ERROR: disk full"}))));
    }

    #[test]
    fn invalid_regex_fails_compile() {
        let err = FilterPredicate::compile("message =~ \"(unclosed\"").unwrap_err();
        assert!(matches!(err, QlError::InvalidFilter(_)));
    }

    #[test]
    fn trailing_garbage_fails_compile() {
        assert!(FilterPredicate::compile("level == \"ERROR\" extra").is_err());
    }
}
