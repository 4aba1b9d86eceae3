//! The AST shape handed to the tree walker by the (external) parser
//! collaborator. Only what the walker needs to dispatch is modeled here —
//! no tokenizer, no parser, no pretty-printer; those stay out of this
//! crate.

/// A single, possibly variable-laden token. Expansion (`$VAR`, globs,
/// command substitution) is performed by the `Expander` collaborator
/// (`src/expand.rs`), never here.
///
/// A bare literal carries its raw text, `$VAR` references and all — those
/// are still resolved at expansion time. `$(...)`/backtick command
/// substitution is the one case `Expander` can't resolve from text alone:
/// since this crate never tokenizes or parses shell source itself, the
/// parser collaborator is expected to have already built the substitution
/// body into a `JobList` and handed it over pre-parsed, the same way every
/// other nested block body (`for`/`while`/`if`) arrives as a `JobList`
/// rather than source text.
#[derive(Debug, Clone)]
pub enum Word {
    Literal(String),
    CommandSubstitution(Box<JobList>),
}

impl Word {
    pub fn literal(s: impl Into<String>) -> Self { Word::Literal(s.into()) }

    pub fn command_substitution(body: JobList) -> Self { Word::CommandSubstitution(Box::new(body)) }

    /// The raw text of a literal word, for contexts that need a fixed
    /// string rather than a runtime expansion (a command name after
    /// function/builtin lookup has already resolved it to one). Returns
    /// `None` for a command substitution, which has no text until it runs.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Word::Literal(s) => Some(s),
            Word::CommandSubstitution(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decorator {
    /// Plain command invocation: function lookup, then builtin, then `$PATH`.
    None,
    /// `command foo`: skip function lookup.
    Command,
    /// `builtin foo`: only consider builtins.
    Builtin,
    /// `exec foo`: replace the shell process instead of forking.
    Exec,
}

#[derive(Debug, Clone)]
pub struct RedirectionNode {
    pub fd: i32,
    pub mode: crate::redirection::RedirectMode,
    pub target: Word,
}

#[derive(Debug, Clone)]
pub struct DecoratedStatement {
    pub decorator: Decorator,
    pub command: Word,
    pub arguments: Vec<Word>,
    pub redirections: Vec<RedirectionNode>,
}

#[derive(Debug, Clone)]
pub enum BlockStatement {
    For { variable: String, items: Vec<Word>, body: JobList },
    While { condition: Box<JobList>, body: JobList },
    Function { name: String, params: Vec<String>, body: JobList },
    Begin { body: JobList },
}

/// A block statement plus the redirections attached to its closing keyword
/// (`end 2>&1`, `end >output.txt`) — the block-level equivalent of
/// `DecoratedStatement::redirections`, needed because a whole `begin...end`
/// (or `for`/`while`/`function`) body can be redirected as one unit, not
/// just a single command.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub block: BlockStatement,
    pub redirections: Vec<RedirectionNode>,
}

impl BlockNode {
    pub fn new(block: BlockStatement) -> Self { BlockNode { block, redirections: Vec::new() } }
}

#[derive(Debug, Clone)]
pub struct ElseClause {
    /// `None` for a plain trailing `else`; `Some` for `else if`.
    pub condition: Option<JobList>,
    pub body: JobList,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub condition: Box<JobList>,
    pub body: JobList,
    pub else_clauses: Vec<ElseClause>,
}

#[derive(Debug, Clone)]
pub struct CaseClause {
    pub patterns: Vec<Word>,
    pub body: JobList,
}

#[derive(Debug, Clone)]
pub struct SwitchStatement {
    pub value: Word,
    pub cases: Vec<CaseClause>,
}

/// The node the walker dispatches on: "Not", "DecoratedStatement",
/// "BlockStatement", "IfStatement", "SwitchStatement".
#[derive(Debug, Clone)]
pub enum Statement {
    Not(Box<Statement>),
    Time(Box<Statement>),
    Decorated(DecoratedStatement),
    Block(BlockNode),
    If(IfStatement),
    Switch(SwitchStatement),
}

/// How one pipeline stage's output feeds the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectFrom { Stdout, Stderr, Both }

/// An AST pipeline node: the thing that becomes one runtime
/// [`crate::job::Job`] — a Job node becomes one runtime Job.
#[derive(Debug, Clone)]
pub struct Job {
    pub stages: Vec<Statement>,
    /// `pipe_modes[i]` describes how `stages[i]`'s output feeds
    /// `stages[i+1]`; always `stages.len() - 1` entries.
    pub pipe_modes: Vec<RedirectFrom>,
    pub background: bool,
}

impl Job {
    pub fn single(statement: Statement) -> Self {
        Job { stages: vec![statement], pipe_modes: Vec::new(), background: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector { And, Or }

/// A chain of jobs connected by `&&`/`||`; short-circuits like the shell
/// operators it models.
#[derive(Debug, Clone)]
pub struct JobConjunction {
    pub first: Job,
    pub rest: Vec<(Connector, Job)>,
}

impl JobConjunction {
    pub fn single(job: Job) -> Self { JobConjunction { first: job, rest: Vec::new() } }
}

/// A sequence of (independent, `;`/newline separated) job conjunctions —
/// the body of a script, function, or block.
#[derive(Debug, Clone, Default)]
pub struct JobList(pub Vec<JobConjunction>);

impl JobList {
    pub fn new(items: Vec<JobConjunction>) -> Self { JobList(items) }
    pub fn empty() -> Self { JobList(Vec::new()) }
}
