//! Word expansion: the piece of the Expander collaborator contract this
//! crate provides a default implementation of, grounded on ion's
//! `Expander` trait in `src/lib/shell/mod.rs` (tilde/array/variable/
//! command methods) and its glob handling in the `for`/`switch` builtins.

use crate::ast::{JobList, Word};
use crate::env::VariableStore;
use crate::error::ExpandError;

/// What the tree walker asks of the expansion layer: turn one AST `Word`
/// into zero or more argv strings (unquoted `$array` word-splits; an
/// unmatched glob with no `failglob`-equivalent override removes the word
/// entirely, matching the `UnmatchedWildcard` handling upstream of this
/// trait).
pub trait Expander {
    fn expand_word(&mut self, word: &Word) -> Result<Vec<String>, ExpandError>;

    fn expand_words(&mut self, words: &[Word]) -> Result<Vec<String>, ExpandError> {
        let mut out = Vec::new();
        for word in words {
            out.extend(self.expand_word(word)?);
        }
        Ok(out)
    }
}

/// Runs a job list purely to capture its stdout, for `$(...)` / backtick
/// substitution. Implemented by the exec engine (`exec::ExecEngine`); kept
/// as its own trait here so `expand.rs` never depends on `exec`.
pub trait CommandSubstituter {
    fn run_capture(&mut self, body: &JobList) -> Result<String, ExpandError>;
}

/// The engine's default expander: `$name`/`$name` array word-splitting,
/// `$(...)` command substitution, and glob expansion of the result.
/// Anything fancier (brace expansion, arithmetic) is parser/collaborator
/// territory, out of scope here.
pub struct BasicExpander<'a> {
    pub vars: &'a mut dyn VariableStore,
    pub substituter: &'a mut dyn CommandSubstituter,
}

impl<'a> BasicExpander<'a> {
    pub fn new(vars: &'a mut dyn VariableStore, substituter: &'a mut dyn CommandSubstituter) -> Self {
        BasicExpander { vars, substituter }
    }

    fn expand_variable(&self, text: &str) -> Result<Vec<String>, ExpandError> {
        // `$name` spanning the whole token expands an array to multiple
        // words, matching unquoted `$array` word-splitting semantics.
        if let Some(name) = text.strip_prefix('$') {
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                if let Some(array) = self.vars.get_array(name) {
                    return Ok(array);
                }
                if let Some(scalar) = self.vars.get(name) {
                    return Ok(vec![scalar]);
                }
                return Err(ExpandError::UnknownVariable(name.to_string()));
            }
        }
        Ok(vec![text.to_string()])
    }

    /// Substitutes embedded `$name` references within a larger token
    /// (`"prefix-$name-suffix"`), never word-splitting — only a token that
    /// is *entirely* one `$name` reference splits into multiple words.
    fn substitute_inline(&self, text: &str) -> Result<String, ExpandError> {
        let mut out = String::new();
        let mut chars = text.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(&(_, nc)) = chars.peek() {
                if nc.is_alphanumeric() || nc == '_' {
                    name.push(nc);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            match self.vars.get(&name) {
                Some(v) => out.push_str(&v),
                None => return Err(ExpandError::UnknownVariable(name)),
            }
        }
        Ok(out)
    }

    /// Runs a command substitution's already-parsed body and returns its
    /// captured stdout, trailing newlines stripped by the substituter.
    fn run_command_substitution(&mut self, body: &JobList) -> Result<String, ExpandError> {
        self.substituter.run_capture(body)
    }

    /// Expands variables and inline substitution but never treats glob
    /// metacharacters as filesystem wildcards — used for `switch`/`case`
    /// patterns, which are matched against a string directly rather than
    /// expanded against the cwd the way a bare command argument's `*` is.
    pub fn expand_word_as_pattern(&mut self, word: &Word) -> Result<Vec<String>, ExpandError> {
        let text = match word {
            Word::CommandSubstitution(body) => return Ok(vec![self.run_command_substitution(body)?]),
            Word::Literal(text) => text,
        };
        if text.starts_with('$') {
            let split = self.expand_variable(text)?;
            if split.len() != 1 || split[0] != *text {
                return Ok(split);
            }
        }
        Ok(vec![self.substitute_inline(text)?])
    }

    fn glob_expand(&self, text: &str) -> Result<Vec<String>, ExpandError> {
        if !text.contains(['*', '?', '[']) {
            return Ok(vec![text.to_string()]);
        }
        let matches: Vec<String> = glob::glob(text)
            .map_err(|e| ExpandError::Malformed(e.to_string()))?
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if matches.is_empty() {
            return Err(ExpandError::UnmatchedWildcard(text.to_string()));
        }
        Ok(matches)
    }
}

impl<'a> Expander for BasicExpander<'a> {
    fn expand_word(&mut self, word: &Word) -> Result<Vec<String>, ExpandError> {
        let text = match word {
            Word::CommandSubstitution(body) => return Ok(vec![self.run_command_substitution(body)?]),
            Word::Literal(text) => text,
        };
        if text.starts_with('$') {
            let split = self.expand_variable(text)?;
            if split.len() != 1 || split[0] != *text {
                return Ok(split);
            }
        }
        let substituted = self.substitute_inline(text)?;
        self.glob_expand(&substituted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{MapVariableStore, Scope};

    struct NoSubst;
    impl CommandSubstituter for NoSubst {
        fn run_capture(&mut self, _body: &JobList) -> Result<String, ExpandError> { Ok(String::new()) }
    }

    #[test]
    fn scalar_variable_expands_to_one_word() {
        let mut vars = MapVariableStore::new();
        vars.set("x", "hello".into(), Scope::Local);
        let mut subst = NoSubst;
        let mut expander = BasicExpander::new(&mut vars, &mut subst);
        let out = expander.expand_word(&Word::literal("$x")).unwrap();
        assert_eq!(out, vec!["hello".to_string()]);
    }

    #[test]
    fn array_variable_word_splits() {
        let mut vars = MapVariableStore::new();
        vars.set_array("xs", vec!["a".into(), "b".into()], Scope::Local);
        let mut subst = NoSubst;
        let mut expander = BasicExpander::new(&mut vars, &mut subst);
        let out = expander.expand_word(&Word::literal("$xs")).unwrap();
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn inline_variable_does_not_word_split() {
        let mut vars = MapVariableStore::new();
        vars.set("x", "mid".into(), Scope::Local);
        let mut subst = NoSubst;
        let mut expander = BasicExpander::new(&mut vars, &mut subst);
        let out = expander.expand_word(&Word::literal("pre-$x-post")).unwrap();
        assert_eq!(out, vec!["pre-mid-post".to_string()]);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let mut vars = MapVariableStore::new();
        let mut subst = NoSubst;
        let mut expander = BasicExpander::new(&mut vars, &mut subst);
        assert!(expander.expand_word(&Word::literal("$nope")).is_err());
    }

    struct EchoingSubst;
    impl CommandSubstituter for EchoingSubst {
        fn run_capture(&mut self, body: &JobList) -> Result<String, ExpandError> {
            Ok(format!("ran {} jobs", body.0.len()))
        }
    }

    #[test]
    fn command_substitution_runs_its_parsed_body_as_a_single_word() {
        let mut vars = MapVariableStore::new();
        let mut subst = EchoingSubst;
        let mut expander = BasicExpander::new(&mut vars, &mut subst);
        let body = JobList::new(vec![crate::ast::JobConjunction::single(crate::ast::Job::single(
            crate::ast::Statement::Decorated(crate::ast::DecoratedStatement {
                decorator: crate::ast::Decorator::None,
                command: Word::literal("echo"),
                arguments: Vec::new(),
                redirections: Vec::new(),
            }),
        ))]);
        let out = expander.expand_word(&Word::command_substitution(body)).unwrap();
        assert_eq!(out, vec!["ran 1 jobs".to_string()]);
    }
}
