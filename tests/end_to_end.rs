//! End-to-end exercises of the walker + exec engine together, built against
//! hand-constructed AST nodes (no tokenizer/parser in this crate) and the
//! in-memory collaborators in `context::test_support`.
//!
//! Jobs that fork real processes are marked `background: true` purely to
//! keep `ExecEngine::launch` from calling `tcsetpgrp` on fd 0, which has no
//! controlling terminal to hand off in a test runner; `reap_foreground`
//! still blocks for the result either way, so this doesn't change what's
//! being verified.

use shell_core::ast::{
    BlockNode, DecoratedStatement, Decorator, Job, JobConjunction, JobList, RedirectionNode,
    Statement, SwitchStatement, CaseClause, BlockStatement, Word,
};
use shell_core::context::test_support::test_context;
use shell_core::env::{Scope, VariableStore};
use shell_core::function_store::FunctionDef;
use shell_core::redirection::RedirectMode;

fn decorated(command: &str, args: &[&str]) -> Statement {
    Statement::Decorated(DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal(command),
        arguments: args.iter().map(|a| Word::literal(*a)).collect(),
        redirections: Vec::new(),
    })
}

fn script_of(statements: Vec<Statement>) -> JobList {
    JobList::new(
        statements
            .into_iter()
            .map(|s| {
                let mut job = Job::single(s);
                job.background = true;
                JobConjunction::single(job)
            })
            .collect(),
    )
}

#[test]
fn pipeline_carries_output_between_stages() {
    let mut ctx = test_context();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.txt");

    let echo = decorated("echo", &["hello", "world"]);
    let cat = DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("cat"),
        arguments: Vec::new(),
        redirections: vec![RedirectionNode {
            fd: 1,
            mode: RedirectMode::Overwrite,
            target: Word::literal(out_path.to_str().unwrap()),
        }],
    };
    let job = Job {
        stages: vec![echo, Statement::Decorated(cat)],
        pipe_modes: vec![shell_core::ast::RedirectFrom::Stdout],
        background: true,
    };
    let list = JobList::new(vec![JobConjunction::single(job)]);

    let status = ctx.run(&list).unwrap();
    assert_eq!(status, 0);

    let contents = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(contents, "hello world\n");
}

#[test]
fn three_stage_pipeline_runs_consecutive_deferred_builtins_inline() {
    // `echo` and the middle `cat` are both builtins feeding a downstream
    // stage, so both take the deferred (never-forked) path; only the
    // final `cat`, which owns the real redirection, is actually forked.
    let mut ctx = test_context();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.txt");

    let echo = decorated("echo", &["relayed"]);
    let middle_cat = decorated("cat", &[]);
    let last_cat = DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("cat"),
        arguments: Vec::new(),
        redirections: vec![RedirectionNode {
            fd: 1,
            mode: RedirectMode::Overwrite,
            target: Word::literal(out_path.to_str().unwrap()),
        }],
    };
    let job = Job {
        stages: vec![echo, middle_cat, Statement::Decorated(last_cat)],
        pipe_modes: vec![shell_core::ast::RedirectFrom::Stdout, shell_core::ast::RedirectFrom::Stdout],
        background: true,
    };
    let list = JobList::new(vec![JobConjunction::single(job)]);

    let status = ctx.run(&list).unwrap();
    assert_eq!(status, 0);

    let contents = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(contents, "relayed\n");
}

#[test]
fn redirect_then_append_concatenates_into_one_file() {
    let mut ctx = test_context();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("log.txt");
    let out = out_path.to_str().unwrap();

    let first = DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("echo"),
        arguments: vec![Word::literal("first")],
        redirections: vec![RedirectionNode { fd: 1, mode: RedirectMode::Overwrite, target: Word::literal(out) }],
    };
    let second = DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("echo"),
        arguments: vec![Word::literal("second")],
        redirections: vec![RedirectionNode { fd: 1, mode: RedirectMode::Append, target: Word::literal(out) }],
    };

    let list = script_of(vec![Statement::Decorated(first), Statement::Decorated(second)]);
    let status = ctx.run(&list).unwrap();
    assert_eq!(status, 0);

    let contents = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(contents, "first\nsecond\n");
}

#[test]
fn stderr_redirected_onto_stdout_lands_in_the_same_file() {
    let mut ctx = test_context();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("merged.txt");
    let out = out_path.to_str().unwrap();

    let warn = DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("warn"),
        arguments: vec![Word::literal("proceed")],
        redirections: vec![
            RedirectionNode { fd: 1, mode: RedirectMode::Overwrite, target: Word::literal(out) },
            RedirectionNode { fd: 2, mode: RedirectMode::Overwrite, target: Word::literal("&1") },
        ],
    };

    let list = script_of(vec![Statement::Decorated(warn)]);
    let status = ctx.run(&list).unwrap();
    assert_eq!(status, 0);

    let contents = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(contents, "proceed\n");
}

#[test]
fn piped_block_with_its_own_stderr_merge_runs_its_body_and_forwards_both_streams() {
    // `begin; echo out; echo err 1>&2; end 2>&1 | cat` — the block is not
    // alone in its job, so it must fork and re-enter the walker to run its
    // body instead of reporting success without ever executing it; its own
    // `2>&1` then has to land on whatever fd 1 already points to (the pipe
    // to `cat`), not on the shell's original stderr.
    let mut ctx = test_context();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("merged.txt");

    let echo_out = decorated("echo", &["out"]);
    let echo_err = Statement::Decorated(DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("echo"),
        arguments: vec![Word::literal("err")],
        redirections: vec![RedirectionNode { fd: 1, mode: RedirectMode::Overwrite, target: Word::literal("&2") }],
    });
    let block_body = JobList::new(vec![
        JobConjunction::single(Job::single(echo_out)),
        JobConjunction::single(Job::single(echo_err)),
    ]);
    let block = Statement::Block(BlockNode {
        block: BlockStatement::Begin { body: block_body },
        redirections: vec![RedirectionNode { fd: 2, mode: RedirectMode::Overwrite, target: Word::literal("&1") }],
    });

    let cat = DecoratedStatement {
        decorator: Decorator::None,
        command: Word::literal("cat"),
        arguments: Vec::new(),
        redirections: vec![RedirectionNode {
            fd: 1,
            mode: RedirectMode::Overwrite,
            target: Word::literal(out_path.to_str().unwrap()),
        }],
    };
    let job = Job {
        stages: vec![block, Statement::Decorated(cat)],
        pipe_modes: vec![shell_core::ast::RedirectFrom::Stdout],
        background: true,
    };
    let list = JobList::new(vec![JobConjunction::single(job)]);

    let status = ctx.run(&list).unwrap();
    assert_eq!(status, 0);

    let contents = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(contents, "out\nerr\n");
}

#[test]
fn for_loop_break_stops_before_exhausting_items() {
    let mut ctx = test_context();
    ctx.vars.set("acc", "0".to_string(), Scope::Local);

    let loop_body = JobList::new(vec![JobConjunction::single(Job::single(Statement::Switch(SwitchStatement {
        value: Word::literal("$i"),
        cases: vec![
            CaseClause { patterns: vec![Word::literal("3")], body: script_of(vec![decorated("break", &[])]) },
            CaseClause {
                patterns: vec![Word::literal("*")],
                body: script_of(vec![decorated("set", &["acc", "$acc-$i"])]),
            },
        ],
    })))]);

    let for_stmt = Statement::Block(BlockNode::new(BlockStatement::For {
        variable: "i".to_string(),
        items: vec![Word::literal("1"), Word::literal("2"), Word::literal("3"), Word::literal("4")],
        body: loop_body,
    }));

    let list = script_of(vec![for_stmt]);
    ctx.run(&list).unwrap();

    assert_eq!(ctx.vars.get("acc"), Some("0-1-2".to_string()));
    // the loop variable itself never leaks past the loop frame
    assert_eq!(ctx.vars.get("i"), None);
}

#[test]
fn function_local_assignment_does_not_leak_to_the_caller() {
    let mut ctx = test_context();
    ctx.vars.set("x", "outer".to_string(), Scope::Local);

    let body = script_of(vec![decorated("set", &["x", "inner"])]);
    let flow = ctx.call_function("f", &[], &body, &[]).unwrap();
    assert_eq!(flow.status(), 0);

    assert_eq!(ctx.vars.get("x"), Some("outer".to_string()));
}

#[test]
fn self_recursive_function_trips_the_recursion_guard() {
    let mut ctx = test_context();
    let body = script_of(vec![decorated("loopy", &[])]);
    ctx.functions.define(FunctionDef { name: "loopy".to_string(), params: Vec::new(), body: body.clone() });

    let list = script_of(vec![decorated("loopy", &[])]);
    let err = ctx.run(&list).unwrap_err();
    assert!(matches!(
        err,
        shell_core::ExecError::Control(shell_core::ControlFlowError::InfiniteRecursion(name)) if name == "loopy"
    ));
}
