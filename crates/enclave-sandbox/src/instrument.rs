//! Post-acceptance instrumentation rewrite.
//!
//! A plain tree walker that (1) inserts an iteration checkpoint at the head
//! of every loop body and (2) wraps allocation-producing expressions in
//! `AllocDebit` nodes so the interpreter debits the governor by the size of
//! the produced value. Everything else is left untouched, which is what
//! makes the rewrite semantics-preserving.

use enclave_lang::ast::*;

/// Instrument a validated program in place.
pub fn instrument_program(program: &mut Program) {
    for stmt in &mut program.body {
        instrument_stmt(stmt);
    }
}

fn checkpointed(body: Box<Stmt>) -> Box<Stmt> {
    let span = body.span();
    Box::new(Stmt::Block {
        body: vec![Stmt::IterationCheckpoint, *body],
        span,
    })
}

fn instrument_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::Expr { expr, .. } => instrument_expr(expr),
        Stmt::VarDecl { decls, .. } => {
            for decl in decls {
                instrument_pattern(&mut decl.pattern);
                if let Some(init) = &mut decl.init {
                    instrument_expr(init);
                }
            }
        }
        Stmt::FunctionDecl { func, .. } => instrument_function(func),
        Stmt::Return { arg, .. } => {
            if let Some(arg) = arg {
                instrument_expr(arg);
            }
        }
        Stmt::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            instrument_expr(test);
            instrument_stmt(consequent);
            if let Some(alt) = alternate {
                instrument_stmt(alt);
            }
        }
        Stmt::Block { body, .. } => {
            for stmt in body {
                instrument_stmt(stmt);
            }
        }
        Stmt::While { test, body, .. } => {
            instrument_expr(test);
            instrument_stmt(body);
            take_and_checkpoint(body);
        }
        Stmt::DoWhile { body, test, .. } => {
            instrument_stmt(body);
            instrument_expr(test);
            take_and_checkpoint(body);
        }
        Stmt::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            match init {
                Some(ForInit::VarDecl { decls, .. }) => {
                    for decl in decls {
                        if let Some(init) = &mut decl.init {
                            instrument_expr(init);
                        }
                    }
                }
                Some(ForInit::Expr(e)) => instrument_expr(e),
                None => {}
            }
            if let Some(test) = test {
                instrument_expr(test);
            }
            if let Some(update) = update {
                instrument_expr(update);
            }
            instrument_stmt(body);
            take_and_checkpoint(body);
        }
        Stmt::ForOf {
            iterable, body, ..
        } => {
            instrument_expr(iterable);
            instrument_stmt(body);
            take_and_checkpoint(body);
        }
        Stmt::ForIn { object, body, .. } => {
            instrument_expr(object);
            instrument_stmt(body);
            take_and_checkpoint(body);
        }
        Stmt::Throw { arg, .. } => instrument_expr(arg),
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            for stmt in block {
                instrument_stmt(stmt);
            }
            if let Some(handler) = handler {
                for stmt in handler {
                    instrument_stmt(stmt);
                }
            }
            if let Some(finalizer) = finalizer {
                for stmt in finalizer {
                    instrument_stmt(stmt);
                }
            }
        }
        Stmt::Break { .. }
        | Stmt::Continue { .. }
        | Stmt::Empty { .. }
        | Stmt::IterationCheckpoint => {}
    }
}

fn take_and_checkpoint(body: &mut Box<Stmt>) {
    let span = body.span();
    let inner = std::mem::replace(body.as_mut(), Stmt::Empty { span });
    *body = checkpointed(Box::new(inner));
}

fn instrument_function(func: &mut Function) {
    for param in &mut func.params {
        if let Some(default) = &mut param.default {
            instrument_expr(default);
        }
    }
    for stmt in &mut func.body {
        instrument_stmt(stmt);
    }
}

fn instrument_pattern(pattern: &mut Pattern) {
    match pattern {
        Pattern::Ident { .. } => {}
        Pattern::Array { elements, .. } => {
            for elem in elements.iter_mut().flatten() {
                instrument_pattern(&mut elem.pattern);
                if let Some(default) = &mut elem.default {
                    instrument_expr(default);
                }
            }
        }
        Pattern::Object { props, .. } => {
            for prop in props {
                if let PropKey::Computed(expr) = &mut prop.key {
                    instrument_expr(expr);
                }
                instrument_pattern(&mut prop.binding);
                if let Some(default) = &mut prop.default {
                    instrument_expr(default);
                }
            }
        }
    }
}

/// Method calls whose results are debited as fresh strings.
const STRING_PRODUCING_METHODS: &[&str] = &["repeat", "join", "concat", "padStart", "padEnd"];

/// Method calls whose results are debited as fresh arrays.
const ARRAY_PRODUCING_METHODS: &[&str] = &["fill"];

fn instrument_expr(expr: &mut Expr) {
    // Recurse first, then wrap the node itself if it allocates.
    match expr {
        Expr::Number { .. }
        | Expr::BigInt { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::Undefined { .. }
        | Expr::Regex { .. }
        | Expr::Ident { .. } => {}
        Expr::Template { exprs, .. } => {
            for e in exprs {
                instrument_expr(e);
            }
        }
        Expr::TaggedTemplate { tag, exprs, .. } => {
            instrument_expr(tag);
            for e in exprs {
                instrument_expr(e);
            }
        }
        Expr::Array { elements, .. } => {
            for elem in elements {
                match elem {
                    ArrayElem::Expr(e) | ArrayElem::Spread(e) => instrument_expr(e),
                    ArrayElem::Hole => {}
                }
            }
        }
        Expr::Object { props, .. } => {
            for prop in props {
                match prop {
                    ObjectProp::KeyValue { key, value, .. } => {
                        if let PropKey::Computed(e) = key {
                            instrument_expr(e);
                        }
                        instrument_expr(value);
                    }
                    ObjectProp::Shorthand { .. } => {}
                    ObjectProp::Spread { arg, .. } => instrument_expr(arg),
                }
            }
        }
        Expr::Function { func, .. } => instrument_function(func),
        Expr::Unary { arg, .. } => instrument_expr(arg),
        Expr::Update { target, .. } => instrument_target(target),
        Expr::Binary { left, right, .. } => {
            instrument_expr(left);
            instrument_expr(right);
        }
        Expr::Logical { left, right, .. } => {
            instrument_expr(left);
            instrument_expr(right);
        }
        Expr::Assign { target, value, .. } => {
            instrument_target(target);
            instrument_expr(value);
        }
        Expr::Cond {
            test,
            consequent,
            alternate,
            ..
        } => {
            instrument_expr(test);
            instrument_expr(consequent);
            instrument_expr(alternate);
        }
        Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
            instrument_expr(callee);
            for arg in args {
                match arg {
                    Arg::Expr(e) | Arg::Spread(e) => instrument_expr(e),
                }
            }
        }
        Expr::Member {
            object, property, ..
        } => {
            instrument_expr(object);
            if let MemberProp::Computed(e) = property {
                instrument_expr(e);
            }
        }
        Expr::Await { arg, .. } => instrument_expr(arg),
        Expr::Yield { arg, .. } => {
            if let Some(arg) = arg {
                instrument_expr(arg);
            }
        }
        Expr::AllocDebit { inner, .. } => instrument_expr(inner),
    }

    if let Some(kind) = alloc_kind(expr) {
        let span = expr.span();
        let inner = std::mem::replace(expr, Expr::Undefined { span });
        *expr = Expr::AllocDebit {
            kind,
            inner: Box::new(inner),
        };
    }
}

fn instrument_target(target: &mut AssignTarget) {
    match target {
        AssignTarget::Ident { .. } => {}
        AssignTarget::Member {
            object, property, ..
        } => {
            instrument_expr(object);
            if let MemberProp::Computed(e) = property {
                instrument_expr(e);
            }
        }
        AssignTarget::Pattern(pattern) => instrument_pattern(pattern),
    }
}

/// Does this node produce a fresh allocation worth debiting?
fn alloc_kind(expr: &Expr) -> Option<AllocKind> {
    match expr {
        // String concatenation; non-string additions are skipped at runtime.
        Expr::Binary {
            op: BinaryOp::Add, ..
        } => Some(AllocKind::StringResult),
        Expr::Template { .. } => Some(AllocKind::StringResult),
        Expr::Array { .. } => Some(AllocKind::ArrayResult),
        Expr::Call { callee, .. } => match callee.as_ref() {
            Expr::Member {
                property: MemberProp::Ident(name),
                object,
                ..
            } => {
                if STRING_PRODUCING_METHODS.contains(&name.as_str()) {
                    Some(AllocKind::StringResult)
                } else if ARRAY_PRODUCING_METHODS.contains(&name.as_str()) {
                    Some(AllocKind::ArrayResult)
                } else if name == "from" {
                    // Array.from
                    match object.as_ref() {
                        Expr::Ident { name, .. } if name == "Array" => {
                            Some(AllocKind::ArrayResult)
                        }
                        _ => None,
                    }
                } else {
                    None
                }
            }
            _ => None,
        },
        _ => None,
    }
}
