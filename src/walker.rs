//! C9 — tree walker.
//!
//! Dispatches AST nodes produced by the (external) parser collaborator,
//! implementing for/while/if/switch/function/begin control flow plus the
//! recursion and block-depth guards. Grounded on ion's `FlowLogic`
//! trait (`src/shell/flow.rs`: `execute_for`/`execute_while`/`execute_if`)
//! and `Function::execute`'s variable-shadowing save/restore
//! (`src/shell/flow_control.rs`).

use crate::ast::{self, Connector, JobConjunction, JobList};
use crate::block::{Block, BlockKind, LoopKind};
use crate::context::ShellContext;
use crate::env::Scope;
use crate::error::{ControlFlowError, ExecError};
use crate::status;

/// Replaces goto/exception-based control flow: every statement execution
/// reports which way it wants its enclosing scope to unwind, instead of
/// throwing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Ran to completion; carries the resulting `$status`.
    Normal(i32),
    Break,
    Continue,
}

impl Flow {
    pub fn status(self) -> i32 {
        match self {
            Flow::Normal(s) => s,
            Flow::Break | Flow::Continue => status::SUCCESS,
        }
    }
}

impl ShellContext {
    /// Executes a sequence of job conjunctions, the body of a script,
    /// function, or block. Stops early on `break`/`continue` so the
    /// enclosing loop can react, and on the first job conjunction whose
    /// result the caller doesn't want to continue past (callers never see
    /// `;`-separated statements short-circuit on failure — that's
    /// `&&`/`||`'s job, handled in [`ShellContext::execute_conjunction`]).
    pub fn execute_job_list(&mut self, list: &JobList) -> Result<Flow, ExecError> {
        let mut last_status = self.previous_status;
        for conjunction in &list.0 {
            match self.execute_conjunction(conjunction)? {
                Flow::Normal(s) => last_status = s,
                flow @ (Flow::Break | Flow::Continue) => return Ok(flow),
            }
        }
        self.previous_status = last_status;
        Ok(Flow::Normal(last_status))
    }

    /// `first && rest[0] && rest[1] ...` with `Or` connectors mixed in;
    /// short-circuits the way shell `&&`/`||` chains do.
    pub fn execute_conjunction(&mut self, conj: &JobConjunction) -> Result<Flow, ExecError> {
        let mut flow = self.execute_ast_job(&conj.first)?;
        for (connector, job) in &conj.rest {
            let proceed = match (connector, flow) {
                (Connector::And, Flow::Normal(s)) => s == status::SUCCESS,
                (Connector::Or, Flow::Normal(s)) => s != status::SUCCESS,
                (_, Flow::Break | Flow::Continue) => return Ok(flow),
            };
            if !proceed {
                continue;
            }
            flow = self.execute_ast_job(job)?;
        }
        Ok(flow)
    }

    /// Dispatches one AST `Job` (pipeline) node. A single-stage job whose
    /// stage is a control-flow construct (`for`/`while`/`function`/`begin`/
    /// `if`/`switch`) is handled directly here with its proper semantics;
    /// anything else (including a real pipeline) is populated and launched
    /// through the exec engine (C6).
    pub fn execute_ast_job(&mut self, job: &ast::Job) -> Result<Flow, ExecError> {
        let has_own_redirections = matches!(
            &job.stages.first(),
            Some(ast::Statement::Block(node)) if !node.redirections.is_empty()
        );
        if job.stages.len() == 1 && !has_own_redirections {
            if let Some(flow) = self.try_execute_control_flow(&job.stages[0])? {
                return Ok(flow);
            }
        }
        self.populate_and_launch(job)
    }

    /// Populates the runtime [`crate::job::Job`] from the AST node and
    /// either calls the resolved function directly (re-entering the
    /// walker) or hands it to the exec engine (C6) to fork/exec. A
    /// single-stage job resolving to a function call with no redirections
    /// of its own is the common case that never touches the exec engine's
    /// process-group machinery at all, the way ion's `run_pipeline`
    /// special-cases functions ahead of
    /// `PipelineExecution::execute_pipeline` (`src/shell/mod.rs`). A
    /// function/block/`if`/`switch` stage that either carries its own
    /// redirections or sits in a real pipeline falls through to the exec
    /// engine instead, which forks it and calls back into
    /// [`ShellContext::call_function`]/[`ShellContext::try_execute_control_flow`]
    /// through the `reentry` callback built below.
    fn populate_and_launch(&mut self, ast_job: &ast::Job) -> Result<Flow, ExecError> {
        let path_var = self.vars.get("PATH");
        let functions_ptr: *const dyn crate::function_store::FunctionStore = self.functions.as_ref();
        let mut substituter = ContextSubstituter(self as *mut ShellContext);
        let mut expander = {
            use crate::expand::BasicExpander;
            BasicExpander::new(self.vars.as_mut(), &mut substituter)
        };
        // Safety: `functions` is read-only for the duration of population
        // and is not touched by `expander`/`substituter`.
        let functions_ref = unsafe { &*functions_ptr };
        let mut job = self
            .exec
            .populate_job(ast_job, &mut expander, functions_ref, path_var.as_deref())?;

        if job.processes.len() == 1 && job.processes[0].io.extra.is_empty() {
            if let crate::process::ProcessKind::FunctionOrBlock { body, params } = job.processes[0].kind.clone() {
                let name = job.processes[0].argv[0].clone();
                let args = job.processes[0].argv[1..].to_vec();
                let negate = job.flags.contains(crate::job::JobFlags::NEGATE);
                let flow = self.call_function(&name, &params, &body, &args)?;
                let flow = if negate {
                    match flow {
                        Flow::Normal(s) => Flow::Normal((s == status::SUCCESS) as i32),
                        other => other,
                    }
                } else {
                    flow
                };
                self.previous_status = flow.status();
                return Ok(flow);
            }
        }

        let ctx_ptr: *mut ShellContext = self as *mut ShellContext;
        let mut reentry = move |request: crate::exec::ReentryRequest<'_>| -> Result<i32, ExecError> {
            // Safety: this closure only ever runs inside a forked child
            // (a fresh copy of this process's address space) or, for the
            // never-forked fast path, synchronously within this very call
            // to `exec.launch` below — never concurrently with the `self`
            // borrow that's about to be re-taken as `self.vars.as_mut()`.
            let ctx = unsafe { &mut *ctx_ptr };
            match request {
                crate::exec::ReentryRequest::FunctionOrBlock { name, params, body, args } => {
                    Ok(ctx.call_function(name, params, body, args)?.status())
                }
                crate::exec::ReentryRequest::Eval { statement } => {
                    Ok(ctx
                        .try_execute_control_flow(statement)?
                        .map(|f| f.status())
                        .unwrap_or(status::SUCCESS))
                }
            }
        };
        let status_code =
            self.exec.launch(&mut job, self.vars.as_mut(), Some(&mut reentry), self.events.as_mut())?;
        self.previous_status = status_code;
        Ok(Flow::Normal(status_code))
    }

    /// Returns `Some` if `stmt` is a control-flow construct handled
    /// in-process by the walker rather than via the exec engine; `None`
    /// means "fall through to population/launch" (plain commands,
    /// pipelines, and piped control-flow blocks all fall through).
    fn try_execute_control_flow(&mut self, stmt: &ast::Statement) -> Result<Option<Flow>, ExecError> {
        match stmt {
            ast::Statement::Not(inner) => {
                let inner_flow = self.try_execute_control_flow(inner)?;
                Ok(inner_flow.map(|f| match f {
                    Flow::Normal(s) => Flow::Normal((s == status::SUCCESS) as i32),
                    other => other,
                }))
            }
            ast::Statement::Time(inner) => {
                let start = std::time::Instant::now();
                let result = self.try_execute_control_flow(inner)?;
                if result.is_some() {
                    eprintln!("shell-core: executed in {:?}", start.elapsed());
                }
                Ok(result)
            }
            ast::Statement::Block(node) => Ok(Some(self.execute_block_statement(&node.block)?)),
            ast::Statement::If(if_stmt) => Ok(Some(self.execute_if(if_stmt)?)),
            ast::Statement::Switch(switch_stmt) => Ok(Some(self.execute_switch(switch_stmt)?)),
            // `break`/`continue` are ordinary command words, not dedicated
            // grammar — the walker recognizes them the way fish's executor
            // special-cases them ahead of builtin dispatch, rather than the
            // parser producing a distinct AST node for either.
            ast::Statement::Decorated(decorated) if is_bare_loop_control(decorated, "break") => {
                if self.blocks.nearest_loop_index().is_none() {
                    return Err(ExecError::Control(ControlFlowError::LoopControlOutsideLoop));
                }
                Ok(Some(Flow::Break))
            }
            ast::Statement::Decorated(decorated) if is_bare_loop_control(decorated, "continue") => {
                if self.blocks.nearest_loop_index().is_none() {
                    return Err(ExecError::Control(ControlFlowError::LoopControlOutsideLoop));
                }
                Ok(Some(Flow::Continue))
            }
            ast::Statement::Decorated(_) => Ok(None),
        }
    }

    fn execute_block_statement(&mut self, block: &ast::BlockStatement) -> Result<Flow, ExecError> {
        match block {
            ast::BlockStatement::For { variable, items, body } => self.execute_for(variable, items, body),
            ast::BlockStatement::While { condition, body } => self.execute_while(condition, body),
            ast::BlockStatement::Function { name, params, body } => {
                self.functions.define(crate::function_store::FunctionDef {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                });
                Ok(Flow::Normal(status::SUCCESS))
            }
            ast::BlockStatement::Begin { body } => self.execute_begin(body),
        }
    }

    fn execute_for(&mut self, variable: &str, items: &[ast::Word], body: &JobList) -> Result<Flow, ExecError> {
        let mut expanded = Vec::new();
        for word in items {
            expanded.extend(self.expand_word_now(word)?);
        }

        self.blocks.push(Block::new(BlockKind::Loop { kind: LoopKind::For })).map_err(ExecError::Control)?;
        let prior = self.vars.get(variable);
        self.blocks.current_mut().shadow(variable, prior);

        let mut last_status = status::SUCCESS;
        for item in &expanded {
            if variable != "_" {
                self.vars.set(variable, item.clone(), Scope::Local);
            }
            match self.execute_job_list(body)? {
                Flow::Normal(s) => last_status = s,
                Flow::Break => break,
                Flow::Continue => continue,
            }
        }

        self.pop_block_and_restore();
        Ok(Flow::Normal(last_status))
    }

    fn execute_while(&mut self, condition: &JobList, body: &JobList) -> Result<Flow, ExecError> {
        self.blocks.push(Block::new(BlockKind::Loop { kind: LoopKind::While })).map_err(ExecError::Control)?;

        let mut last_status = status::SUCCESS;
        loop {
            if self.execute_job_list(condition)?.status() != status::SUCCESS {
                break;
            }
            match self.execute_job_list(body)? {
                Flow::Normal(s) => last_status = s,
                Flow::Break => break,
                Flow::Continue => continue,
            }
        }

        self.pop_block_and_restore();
        Ok(Flow::Normal(last_status))
    }

    fn execute_begin(&mut self, body: &JobList) -> Result<Flow, ExecError> {
        self.blocks.push(Block::new(BlockKind::Begin)).map_err(ExecError::Control)?;
        let flow = self.execute_job_list(body)?;
        self.pop_block_and_restore();
        Ok(flow)
    }

    fn execute_if(&mut self, if_stmt: &ast::IfStatement) -> Result<Flow, ExecError> {
        if self.execute_job_list(&if_stmt.condition)?.status() == status::SUCCESS {
            return self.execute_begin(&if_stmt.body);
        }
        for clause in &if_stmt.else_clauses {
            match &clause.condition {
                Some(cond) => {
                    if self.execute_job_list(cond)?.status() == status::SUCCESS {
                        return self.execute_begin(&clause.body);
                    }
                }
                None => return self.execute_begin(&clause.body),
            }
        }
        Ok(Flow::Normal(status::SUCCESS))
    }

    fn execute_switch(&mut self, switch_stmt: &ast::SwitchStatement) -> Result<Flow, ExecError> {
        let mut values = self.expand_word_as_pattern_now(&switch_stmt.value)?;
        let value = values.pop().unwrap_or_default();
        for case in &switch_stmt.cases {
            for pattern in &case.patterns {
                let expanded = self.expand_word_as_pattern_now(pattern)?;
                let matched = expanded.iter().any(|p| glob_match(p, &value));
                if matched {
                    return self.execute_begin(&case.body);
                }
            }
        }
        Ok(Flow::Normal(status::SUCCESS))
    }

    /// Calls a user-defined function: pushes a `FunctionCall` frame,
    /// snapshots every variable currently in scope so the body's writes
    /// (parameters and any other `set`) are local to the call, checks the
    /// infinite-recursion and stack-overflow guards, runs the body, then
    /// restores the snapshot — mirrors `Function::execute`'s backup/restore
    /// dance in ion's `src/shell/flow_control.rs`, generalized from
    /// "just the declared parameters" to a snapshot of every variable
    /// visible at the call site.
    pub fn call_function(&mut self, name: &str, params: &[String], body: &JobList, args: &[String]) -> Result<Flow, ExecError> {
        if self.blocks.function_call_depth(name) >= self.exec.config.max_function_recursion {
            return Err(ExecError::Control(ControlFlowError::InfiniteRecursion(name.to_string())));
        }
        if params.len() != args.len() {
            return Err(ExecError::Control(ControlFlowError::ArgCount(name.to_string(), params.len(), args.len())));
        }

        self.blocks
            .push(Block::new(BlockKind::FunctionCall { name: name.to_string() }))
            .map_err(ExecError::Control)?;

        for existing in self.vars.names() {
            let prior = self.vars.get(&existing);
            self.blocks.current_mut().shadow(&existing, prior);
        }
        for (param, value) in params.iter().zip(args.iter()) {
            let prior = self.vars.get(param);
            self.blocks.current_mut().shadow(param, prior);
            self.vars.set(param, value.clone(), Scope::Local);
        }

        let result = self.execute_job_list(body);
        self.pop_block_and_restore();
        result
    }

    fn pop_block_and_restore(&mut self) {
        if let Some(block) = self.blocks.pop() {
            for (name, prior) in block.into_restorations() {
                match prior {
                    Some(value) => self.vars.set(&name, value, Scope::Local),
                    None => {
                        self.vars.remove(&name);
                    }
                }
            }
        }
    }

    fn expand_word_now(&mut self, word: &ast::Word) -> Result<Vec<String>, ExecError> {
        use crate::expand::{BasicExpander, Expander};
        let mut substituter = ContextSubstituter(self as *mut ShellContext);
        let mut expander = BasicExpander::new(self.vars.as_mut(), &mut substituter);
        expander.expand_word(word).map_err(ExecError::from)
    }

    /// Like [`ShellContext::expand_word_now`], but for `switch`/`case`
    /// words: variables and inline substitution still apply, glob
    /// metacharacters don't touch the filesystem.
    fn expand_word_as_pattern_now(&mut self, word: &ast::Word) -> Result<Vec<String>, ExecError> {
        use crate::expand::BasicExpander;
        let mut substituter = ContextSubstituter(self as *mut ShellContext);
        let mut expander = BasicExpander::new(self.vars.as_mut(), &mut substituter);
        expander.expand_word_as_pattern(word).map_err(ExecError::from)
    }
}

/// Bridges `self`'s `run_capture` (which needs a full `&mut ShellContext`
/// to fork/execute the substitution body) into the `CommandSubstituter`
/// trait object `BasicExpander` wants, without holding two overlapping
/// `&mut` borrows of `self` at once.
struct ContextSubstituter(*mut ShellContext);

impl crate::expand::CommandSubstituter for ContextSubstituter {
    fn run_capture(&mut self, body: &JobList) -> Result<String, crate::error::ExpandError> {
        // Safety: `self.0` is `self` from `expand_word_now`, which outlives
        // this call and is not accessed concurrently — the only other
        // active borrow at the call site is `self.vars`, which this never
        // touches directly (it re-enters through `ShellContext` methods).
        let ctx = unsafe { &mut *self.0 };
        ctx.run_capture(body)
    }
}

/// `break`/`continue` are recognized as plain, argument-less, undecorated
/// command words rather than dedicated grammar — the way fish's executor
/// special-cases them ahead of builtin dispatch (`src/builtins/mod.rs`).
/// A decorated, redirected, or argument-bearing use of the word (`command
/// break`, `break 2>/dev/null`) falls through to ordinary population and
/// launch instead, where no such builtin exists and it fails normally.
fn is_bare_loop_control(decorated: &ast::DecoratedStatement, word: &str) -> bool {
    decorated.decorator == ast::Decorator::None
        && decorated.command.as_literal() == Some(word)
        && decorated.arguments.is_empty()
        && decorated.redirections.is_empty()
}

/// Matches a switch-case pattern against a value, supporting glob wildcards
/// the way fish's `switch`/`case` does via `wildcard_match`.
fn glob_match(pattern: &str, value: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(value),
        Err(_) => pattern == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;

    #[test]
    fn empty_job_list_preserves_previous_status() {
        let mut ctx = test_context();
        ctx.previous_status = 7;
        let flow = ctx.execute_job_list(&JobList::empty()).unwrap();
        assert_eq!(flow, Flow::Normal(7));
    }

    #[test]
    fn glob_match_supports_wildcards() {
        assert!(glob_match("a*", "abc"));
        assert!(!glob_match("a*", "xyz"));
        assert!(glob_match("exact", "exact"));
    }
}
