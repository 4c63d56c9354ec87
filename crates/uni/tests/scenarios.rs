//! End-to-end scenarios driving the evaluator through `Runner`.
//!
//! There is no parser in this crate, so every program here is hand-assembled
//! `uni::Node` trees via the small helpers below, the same way the teacher's
//! own integration tests build `Object` values directly rather than going
//! through source text when the thing under test is the evaluator itself,
//! not the (absent) front end.

use std::rc::Rc;

use pretty_assertions::assert_eq;
use uni::{
    BinOp, Context, ErrorKind, EvalConfig, LimitedTracker, Node, NodeKind, NoopTracer, ResourceError, ResourceLimits,
    Runner, Span, Value,
};

// === AST construction helpers ===

fn sp() -> Span {
    Span::synthetic()
}

fn num(n: f64) -> Node {
    Node::leaf(sp(), NodeKind::Number(n))
}

fn str_lit(s: &str) -> Node {
    Node::leaf(sp(), NodeKind::String(Rc::from(s)))
}

fn name(s: &str) -> Node {
    Node::leaf(sp(), NodeKind::Name(Rc::from(s)))
}

fn seq(children: Vec<Node>) -> Node {
    Node::new(sp(), NodeKind::Sequence, children)
}

fn declare(pattern: Node, expr: Node) -> Node {
    Node::new(sp(), NodeKind::Declare, vec![pattern, expr])
}

fn mutable(pattern: Node) -> Node {
    Node::new(sp(), NodeKind::Mutable, vec![pattern])
}

fn inc_assign(op: BinOp, target: Node, expr: Node) -> Node {
    Node::new(sp(), NodeKind::IncAssign(op), vec![target, expr])
}

fn binop(op: BinOp, l: Node, r: Node) -> Node {
    Node::new(sp(), NodeKind::BinOp(op), vec![l, r])
}

fn tuple(children: Vec<Node>) -> Node {
    Node::new(sp(), NodeKind::Tuple, children)
}

fn square_brackets(children: Vec<Node>) -> Node {
    Node::new(sp(), NodeKind::SquareBrackets, children)
}

fn label(key: Node, value: Node) -> Node {
    Node::new(sp(), NodeKind::Label, vec![key, value])
}

fn apply(callee: Node, args: Vec<Node>) -> Node {
    Node::new(sp(), NodeKind::Application, vec![callee, tuple(args)])
}

fn func(param: Node, body: Node) -> Node {
    Node::new(sp(), NodeKind::Function { binds_self: false }, vec![param, body])
}

fn if_else(cond: Node, then_: Node, else_: Node) -> Node {
    Node::new(sp(), NodeKind::IfElse, vec![cond, then_, else_])
}

fn for_loop(pattern: Node, iterable: Node, body: Node) -> Node {
    Node::new(sp(), NodeKind::For, vec![pattern, iterable, body])
}

fn fork(body: Node) -> Node {
    Node::new(sp(), NodeKind::Fork, vec![body])
}

fn await_task(task: Node) -> Node {
    Node::new(sp(), NodeKind::Await, vec![task])
}

fn send(channel: Node, value: Node) -> Node {
    Node::new(sp(), NodeKind::Send, vec![channel, value])
}

fn receive(channel: Node) -> Node {
    Node::new(sp(), NodeKind::Receive, vec![channel])
}

fn send_status(channel: Node, value: Node) -> Node {
    Node::new(sp(), NodeKind::SendStatus, vec![channel, value])
}

fn receive_status(channel: Node) -> Node {
    Node::new(sp(), NodeKind::ReceiveStatus, vec![channel])
}

fn atom(name: &str) -> Node {
    Node::leaf(sp(), NodeKind::Atom(Rc::from(name)))
}

fn inject(handlers: Node, body: Node) -> Node {
    Node::new(sp(), NodeKind::Inject, vec![handlers, body])
}

fn mask(names: &[&str], body: Node) -> Node {
    Node::new(sp(), NodeKind::Mask(names.iter().map(|n| Rc::from(*n)).collect()), vec![body])
}

fn without(names: &[&str], body: Node) -> Node {
    Node::new(sp(), NodeKind::Without(names.iter().map(|n| Rc::from(*n)).collect()), vec![body])
}

fn injected() -> Node {
    Node::leaf(sp(), NodeKind::Injected)
}

fn match_(discriminant: Node, cases: Vec<Node>) -> Node {
    let mut children = vec![discriminant];
    children.extend(cases);
    Node::new(sp(), NodeKind::Match, children)
}

fn case(pattern: Node, body: Node) -> Node {
    Node::new(sp(), NodeKind::MatchCase, vec![pattern, body])
}

fn is(value: Node, pattern: Node) -> Node {
    Node::new(sp(), NodeKind::Is, vec![value, pattern])
}

// === Arithmetic, declarations, sequencing ===

#[test]
fn declared_names_are_visible_to_later_statements_in_a_sequence() {
    let program = seq(vec![
        declare(name("x"), num(1.0)),
        declare(name("y"), num(2.0)),
        binop(BinOp::Add, name("x"), name("y")),
    ]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(3.0));
}

#[test]
fn undeclared_name_reports_a_name_error() {
    let program = binop(BinOp::Add, name("missing"), num(1.0));
    let runner = Runner::new();
    let err = runner.run(&program).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Name { .. }));
}

// === Functions and recursion ===

#[test]
fn calling_a_function_binds_its_parameter_by_destructuring_the_call_tuple() {
    // f := fn((x)) { x + 1 }; f(41)
    let f = func(tuple(vec![name("x")]), binop(BinOp::Add, name("x"), num(1.0)));
    let program = seq(vec![declare(name("f"), f), apply(name("f"), vec![num(41.0)])]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(42.0));
}

#[test]
fn a_function_can_recurse_through_its_own_declared_name() {
    // f := fn((n)) { if n <= 0 { 0 } else { f(n - 1) } }; f(5)
    //
    // No `binds_self` wiring needed: `f`'s closure captures the *same*
    // environment frame that `declare` binds `f` into right after, so the
    // lookup inside the body finds it once the outer `Declare` completes.
    let cond = binop(BinOp::LtEq, name("n"), num(0.0));
    let recurse = apply(name("f"), vec![binop(BinOp::Sub, name("n"), num(1.0))]);
    let body = if_else(cond, num(0.0), recurse);
    let f = func(tuple(vec![name("n")]), body);
    let program = seq(vec![declare(name("f"), f), apply(name("f"), vec![num(5.0)])]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(0.0));
}

#[test]
fn exceeding_the_configured_recursion_depth_is_a_resource_error() {
    let cond = binop(BinOp::LtEq, name("n"), num(0.0));
    let recurse = apply(name("f"), vec![binop(BinOp::Sub, name("n"), num(1.0))]);
    let body = if_else(cond, num(0.0), recurse);
    let f = func(tuple(vec![name("n")]), body);
    let program = seq(vec![declare(name("f"), f), apply(name("f"), vec![num(1000.0)])]);

    let limits = ResourceLimits::new().max_recursion_depth(Some(5));
    let config = EvalConfig {
        resource_limits: limits.clone(),
        resource_tracker: std::cell::RefCell::new(Box::new(LimitedTracker::new(limits))),
        tracer: std::cell::RefCell::new(Box::new(NoopTracer)),
        modules: Default::default(),
        module_loader: None,
    };
    let runner = Runner::with_config(config);
    let err = runner.run(&program).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Resource(ResourceError::Recursion { .. })));
}

// === Loops and mutable bindings ===

#[test]
fn a_for_loop_accumulates_into_a_mutable_outer_binding() {
    // mut total := 0; for item in [1, 2, 3, 4] { total += item }; total
    let init = declare(mutable(name("total")), num(0.0));
    let body = inc_assign(BinOp::Add, name("total"), name("item"));
    let loop_node = for_loop(name("item"), square_brackets(vec![num(1.0), num(2.0), num(3.0), num(4.0)]), body);
    let program = seq(vec![init, loop_node, name("total")]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(10.0));
}

// === Patterns: `is` and `match` ===

#[test]
fn is_reports_whether_a_literal_pattern_matched() {
    let program = seq(vec![declare(name("v"), num(5.0)), is(name("v"), num(5.0))]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Bool(true));
}

#[test]
fn is_does_not_bind_anything_on_a_failed_match() {
    let program = seq(vec![declare(name("v"), num(5.0)), is(name("v"), num(6.0))]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Bool(false));
}

#[test]
fn match_destructures_a_tuple_pattern_against_a_list_value() {
    // point := [3, 4]; match point { (x, y) -> x + y }
    let point = square_brackets(vec![num(3.0), num(4.0)]);
    let pattern = tuple(vec![name("x"), name("y")]);
    let arm = case(pattern, binop(BinOp::Add, name("x"), name("y")));
    let program = seq(vec![declare(name("point"), point), match_(name("point"), vec![arm])]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(7.0));
}

// === Concurrency: fork, await, channels ===

#[test]
fn awaiting_a_forked_task_returns_its_body_value() {
    let program = seq(vec![
        declare(name("t"), fork(binop(BinOp::Add, num(20.0), num(22.0)))),
        await_task(name("t")),
    ]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(42.0));
}

#[test]
fn a_forked_sender_and_the_main_receiver_rendezvous_over_a_channel() {
    // ch := channel(1); fork { ch <- 42 }; <-ch
    let program = seq(vec![
        declare(name("ch"), apply(name("channel"), vec![num(1.0)])),
        fork(send(name("ch"), num(42.0))),
        receive(name("ch")),
    ]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(42.0));
}

// === Channel status operations: `<-!` and `<-?` ===

#[test]
fn send_status_reports_ok_on_a_successful_send() {
    let program = seq(vec![
        declare(name("ch"), apply(name("channel"), vec![num(1.0)])),
        is(send_status(name("ch"), num(1.0)), atom("ok")),
    ]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Bool(true));
}

#[test]
fn receive_status_reports_queued_then_empty() {
    // ch := channel(1); ch <-! 7; (<-? ch is (7, :queued), <-? ch again is (_, :empty))
    let program = seq(vec![
        declare(name("ch"), apply(name("channel"), vec![num(1.0)])),
        send_status(name("ch"), num(7.0)),
        square_brackets(vec![
            is(receive_status(name("ch")), tuple(vec![num(7.0), atom("queued")])),
            is(receive_status(name("ch")), tuple(vec![Node::leaf(sp(), NodeKind::Placeholder), atom("empty")])),
        ]),
    ]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::list(vec![Value::Bool(true), Value::Bool(true)]));
}

#[tokio::test(flavor = "current_thread")]
async fn receive_status_reports_closed_on_a_drained_closed_channel() {
    let env = uni::Environment::root();
    let ch = uni::Channel::new(None);
    ch.close();
    env.declare_immutable(uni::BindingKey::Str(Rc::from("ch")), Value::Channel(ch)).unwrap();
    let ctx = Context::root(env, uni::Interner::new(), 0, Rc::new(EvalConfig::default()));

    let result = uni::run(&receive_status(name("ch")), &ctx).await.unwrap();
    let expected = Value::list(vec![Value::Null, Value::Symbol(ctx.interner.atom("closed"))]);
    assert_eq!(result, expected);
}

#[test]
fn on_cancel_callback_fires_once_a_forked_task_observes_cancellation() {
    // ch := channel(1);
    // t := fork { 1 };
    // on_cancel(t, fn(()) { ch <- :fired });
    // cancel(t);
    // await t
    let callback = func(tuple(vec![]), send(name("ch"), atom("fired")));
    let program = seq(vec![
        declare(name("ch"), apply(name("channel"), vec![num(1.0)])),
        declare(name("t"), fork(num(1.0))),
        apply(name("on_cancel"), vec![name("t"), callback]),
        apply(name("cancel"), vec![name("t")]),
        await_task(name("t")),
    ]);
    let runner = Runner::new();
    let err = runner.run(&program).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Cancelled), "expected the cancelled task's own error, got {err:?}");

    let Some(Value::Channel(ch)) = runner.root_env().lookup(&uni::BindingKey::Str(Rc::from("ch"))) else {
        panic!("ch binding missing from the root environment");
    };
    let fired = Value::Symbol(runner.interner().atom("fired"));
    assert_eq!(ch.try_receive(), Some(Some(fired)), "on_cancel callback should have sent :fired before the task finished");
}

// === Structured concurrency builtins ===

#[test]
fn sync_joins_every_directly_forked_child_before_returning() {
    // sync(fn(()) { t := fork { 99 }; await t })
    let body = seq(vec![declare(name("t"), fork(num(99.0))), await_task(name("t"))]);
    let scope_fn = func(tuple(vec![]), body);
    let program = apply(name("sync"), vec![scope_fn]);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::Number(99.0));
}

#[test]
fn cancel_on_error_propagates_a_thrown_error_out_of_the_scope() {
    // cancel_on_error(fn(()) { throw("boom") })
    let body = apply(name("throw"), vec![str_lit("boom")]);
    let scope_fn = func(tuple(vec![]), body);
    let program = apply(name("cancel_on_error"), vec![scope_fn]);
    let runner = Runner::new();
    let err = runner.run(&program).unwrap_err();
    match err.kind {
        ErrorKind::User(Value::String(s)) => assert_eq!(&*s, "boom"),
        other => panic!("expected a user error carrying the thrown payload, got {other:?}"),
    }
}

// === Effect handler chain ===

#[test]
fn injected_reflects_mask_and_without_over_a_nested_inject() {
    // inject { a: 1, b: 2, c: 3 } { mask "a" { without "b" { injected } } }
    let handlers = tuple(vec![
        label(str_lit("a"), num(1.0)),
        label(str_lit("b"), num(2.0)),
        label(str_lit("c"), num(3.0)),
    ]);
    let body = mask(&["a"], without(&["b"], injected()));
    let program = inject(handlers, body);
    let runner = Runner::new();
    let result = runner.run(&program).unwrap();

    let mut expected_fields = uni::RecordData::new();
    expected_fields.insert(uni::RecordKey::Str(Rc::from("c")), Value::Number(3.0));
    let expected = Value::record(expected_fields);
    assert!(result.structural_eq(&expected).unwrap(), "expected only `c` to remain visible, got {result}");
}

#[test]
fn handle_dispatches_to_the_nearest_injected_handler() {
    // inject { greet: fn((resume, payload)) { payload + "!" } } {
    //   handle(:greet, "hi")
    // }
    let handler_body = binop(BinOp::Add, name("payload"), str_lit("!"));
    let handler_fn = func(tuple(vec![Node::leaf(sp(), NodeKind::Placeholder), name("payload")]), handler_body);
    let handlers = tuple(vec![label(str_lit("greet"), handler_fn)]);
    let call = apply(name("handle"), vec![str_lit("greet"), str_lit("hi")]);
    let program = inject(handlers, call);
    let runner = Runner::new();
    assert_eq!(runner.run(&program).unwrap(), Value::string("hi!"));
}

// === Context plumbing, used directly rather than through `Runner` ===

#[test]
fn a_fresh_context_starts_at_recursion_depth_zero_and_is_not_cancelled() {
    let ctx = Context::root(uni::Environment::root(), uni::Interner::new(), 0, Rc::new(EvalConfig::default()));
    assert_eq!(ctx.depth, 0);
    assert!(!ctx.is_cancelled());
    assert!(ctx.check_recursion().is_ok());
}
