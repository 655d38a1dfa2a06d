//! Rule engine over the parsed tree.
//!
//! One pre-order walk visits every node before any evaluation. The first
//! violation wins and short-circuits the run. Which rule groups are active
//! comes from the level's [`RuleSet`]; the prototype-token rules widen at
//! SECURE (literal and folded forms of `constructor` / `prototype` /
//! `__proto__` become violations, not just runtime blocks).

use super::folding::fold_to_string;
use super::redos::{regex_is_suspicious, REDOS_RULE};
use super::rules::ValidatorRulesConfig;
use super::tokens::{
    is_forbidden_token, HARD_FORBIDDEN_IDENTIFIERS, META_PROGRAMMING_MEMBERS, PROTO_TOKENS,
};
use enclave_core::config::{RuleSet, SecurityLevel, ValidatorLimits};
use enclave_lang::ast::*;
use enclave_lang::span::{line_col, Span};
use std::collections::{HashMap, HashSet};

const SNIPPET_MAX: usize = 80;

/// A single rule violation. `unknown_global` selects the `UNKNOWN_GLOBAL`
/// failure kind instead of `VALIDATION_FAILED`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rule '{rule}' violated at line {line}: {message}")]
pub struct ValidationError {
    pub rule: String,
    pub line: usize,
    pub column: usize,
    pub snippet: String,
    pub message: String,
    pub unknown_global: bool,
}

/// Validate a parsed program against the level's rule set.
///
/// `extra_globals` are the names of host-injected globals: legal to
/// reference even under the globals-enumeration rule.
pub fn validate_program(
    source: &str,
    program: &Program,
    level: SecurityLevel,
    extra_globals: &[String],
    limits: ValidatorLimits,
    config: &ValidatorRulesConfig,
) -> Result<(), ValidationError> {
    Validator::new(source, level, extra_globals, limits, config).validate(program)
}

struct Scope {
    bindings: HashSet<String>,
    /// const bindings with statically-folded string values
    consts: HashMap<String, String>,
}

impl Scope {
    fn new() -> Self {
        Self {
            bindings: HashSet::new(),
            consts: HashMap::new(),
        }
    }
}

pub struct Validator<'a> {
    source: &'a str,
    level: SecurityLevel,
    rules: RuleSet,
    limits: ValidatorLimits,
    config: &'a ValidatorRulesConfig,
    allowed: HashSet<String>,
    scopes: Vec<Scope>,
}

impl<'a> Validator<'a> {
    pub fn new(
        source: &'a str,
        level: SecurityLevel,
        extra_globals: &[String],
        limits: ValidatorLimits,
        config: &'a ValidatorRulesConfig,
    ) -> Self {
        let level_config = level.config();
        let mut allowed: HashSet<String> = level_config
            .allowed_globals
            .iter()
            .map(|s| s.to_string())
            .collect();
        allowed.extend(extra_globals.iter().cloned());
        Self {
            source,
            level,
            rules: level_config.rules,
            limits,
            config,
            allowed,
            scopes: Vec::new(),
        }
    }

    pub fn validate(&mut self, program: &Program) -> Result<(), ValidationError> {
        self.scopes.push(Scope::new());
        self.hoist(&program.body);
        for stmt in &program.body {
            self.visit_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    // ─── Error construction ──────────────────────────────────────────────

    fn violation(&self, rule: &str, span: Span, message: impl Into<String>) -> ValidationError {
        let (line, column) = line_col(self.source, span.start);
        let mut snippet = span.snippet(self.source).to_string();
        if snippet.len() > SNIPPET_MAX {
            let mut cut = SNIPPET_MAX;
            while !snippet.is_char_boundary(cut) {
                cut -= 1;
            }
            snippet.truncate(cut);
        }
        ValidationError {
            rule: rule.to_string(),
            line,
            column,
            snippet,
            message: message.into(),
            unknown_global: rule == "unknown-global",
        }
    }

    fn enabled(&self, rule_id: &str, group: bool) -> bool {
        group && !self.config.is_disabled(rule_id)
    }

    // ─── Scope handling ──────────────────────────────────────────────────

    fn hoist(&mut self, body: &[Stmt]) {
        let mut names = Vec::new();
        for stmt in body {
            match stmt {
                Stmt::VarDecl { decls, .. } => {
                    for decl in decls {
                        collect_pattern_names(&decl.pattern, &mut names);
                    }
                }
                Stmt::FunctionDecl { func, .. } => {
                    if let Some(name) = &func.name {
                        names.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.extend(names);
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|s| s.bindings.contains(name))
    }

    fn resolve_const(&self, name: &str) -> Option<String> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.consts.get(name) {
                return Some(v.clone());
            }
            if scope.bindings.contains(name) {
                return None; // shadowed by a non-const binding
            }
        }
        None
    }

    fn with_scope<F>(&mut self, names: Vec<String>, f: F) -> Result<(), ValidationError>
    where
        F: FnOnce(&mut Self) -> Result<(), ValidationError>,
    {
        let mut scope = Scope::new();
        scope.bindings.extend(names);
        self.scopes.push(scope);
        let out = f(self);
        self.scopes.pop();
        out
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), ValidationError> {
        match stmt {
            Stmt::Expr { expr, .. } => self.visit_expr(expr),
            Stmt::VarDecl { kind, decls, .. } => {
                for decl in decls {
                    self.visit_pattern(&decl.pattern)?;
                    if let Some(init) = &decl.init {
                        self.visit_expr(init)?;
                        // Track const string bindings for the folder.
                        if *kind == DeclKind::Const {
                            if let Pattern::Ident { name, .. } = &decl.pattern {
                                let folded = {
                                    let resolver = self.const_resolver();
                                    fold_to_string(init, &resolver)
                                };
                                if let Some(value) = folded {
                                    if let Some(scope) = self.scopes.last_mut() {
                                        scope.consts.insert(name.clone(), value);
                                    }
                                }
                            }
                        }
                    }
                    let mut names = Vec::new();
                    collect_pattern_names(&decl.pattern, &mut names);
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.bindings.extend(names);
                    }
                }
                Ok(())
            }
            Stmt::FunctionDecl { func, span } => {
                if self.enabled("function-form", self.rules.function_forms) {
                    return Err(self.violation(
                        "function-form",
                        *span,
                        "named function declarations are not permitted; use arrow functions",
                    ));
                }
                self.visit_function(func)
            }
            Stmt::Return { arg, .. } => {
                if let Some(arg) = arg {
                    self.visit_expr(arg)?;
                }
                Ok(())
            }
            Stmt::If {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.visit_expr(test)?;
                self.visit_stmt(consequent)?;
                if let Some(alt) = alternate {
                    self.visit_stmt(alt)?;
                }
                Ok(())
            }
            Stmt::Block { body, .. } => self.with_scope(Vec::new(), |v| {
                v.hoist(body);
                for stmt in body {
                    v.visit_stmt(stmt)?;
                }
                Ok(())
            }),
            Stmt::While { test, body, span } => {
                if self.enabled("infinite-loop", self.rules.resource_bombs)
                    && is_always_truthy(test)
                {
                    return Err(self.violation(
                        "infinite-loop",
                        *span,
                        "unbounded loop form (while with constant-true test)",
                    ));
                }
                self.visit_expr(test)?;
                self.visit_stmt(body)
            }
            Stmt::DoWhile { body, test, span } => {
                if self.enabled("infinite-loop", self.rules.resource_bombs)
                    && is_always_truthy(test)
                {
                    return Err(self.violation(
                        "infinite-loop",
                        *span,
                        "unbounded loop form (do-while with constant-true test)",
                    ));
                }
                self.visit_stmt(body)?;
                self.visit_expr(test)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                span,
            } => {
                if self.enabled("infinite-loop", self.rules.resource_bombs)
                    && (test.is_none() || test.as_ref().is_some_and(is_always_truthy))
                {
                    return Err(self.violation(
                        "infinite-loop",
                        *span,
                        "unbounded loop form (for without a bounding test)",
                    ));
                }
                let mut names = Vec::new();
                if let Some(ForInit::VarDecl { decls, .. }) = init {
                    for decl in decls {
                        collect_pattern_names(&decl.pattern, &mut names);
                    }
                }
                self.with_scope(names, |v| {
                    match init {
                        Some(ForInit::VarDecl { decls, .. }) => {
                            for decl in decls {
                                v.visit_pattern(&decl.pattern)?;
                                if let Some(init) = &decl.init {
                                    v.visit_expr(init)?;
                                }
                            }
                        }
                        Some(ForInit::Expr(e)) => v.visit_expr(e)?,
                        None => {}
                    }
                    if let Some(test) = test {
                        v.visit_expr(test)?;
                    }
                    if let Some(update) = update {
                        v.visit_expr(update)?;
                    }
                    v.visit_stmt(body)
                })
            }
            Stmt::ForOf {
                pattern,
                iterable,
                body,
                ..
            }
            | Stmt::ForIn {
                pattern,
                object: iterable,
                body,
                ..
            } => {
                self.visit_expr(iterable)?;
                self.visit_pattern(pattern)?;
                let mut names = Vec::new();
                collect_pattern_names(pattern, &mut names);
                self.with_scope(names, |v| v.visit_stmt(body))
            }
            Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Empty { .. } => Ok(()),
            Stmt::Throw { arg, .. } => self.visit_expr(arg),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
                ..
            } => {
                self.with_scope(Vec::new(), |v| {
                    v.hoist(block);
                    for stmt in block {
                        v.visit_stmt(stmt)?;
                    }
                    Ok(())
                })?;
                if let Some(handler) = handler {
                    let mut names = Vec::new();
                    if let Some(param) = param {
                        self.visit_pattern(param)?;
                        collect_pattern_names(param, &mut names);
                    }
                    self.with_scope(names, |v| {
                        v.hoist(handler);
                        for stmt in handler {
                            v.visit_stmt(stmt)?;
                        }
                        Ok(())
                    })?;
                }
                if let Some(finalizer) = finalizer {
                    self.with_scope(Vec::new(), |v| {
                        v.hoist(finalizer);
                        for stmt in finalizer {
                            v.visit_stmt(stmt)?;
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            }
            Stmt::IterationCheckpoint => Ok(()),
        }
    }

    fn visit_function(&mut self, func: &Function) -> Result<(), ValidationError> {
        if self.enabled("generator-form", self.rules.function_forms) && func.is_generator {
            return Err(self.violation(
                "generator-form",
                func.span,
                "generator functions are not permitted",
            ));
        }
        let mut names = Vec::new();
        if let Some(name) = &func.name {
            names.push(name.clone());
        }
        for param in &func.params {
            collect_pattern_names(&param.pattern, &mut names);
        }
        for param in &func.params {
            self.visit_pattern(&param.pattern)?;
        }
        self.with_scope(names, |v| {
            for param in &func.params {
                if let Some(default) = &param.default {
                    v.visit_expr(default)?;
                }
            }
            v.hoist(&func.body);
            for stmt in &func.body {
                v.visit_stmt(stmt)?;
            }
            Ok(())
        })
    }

    // ─── Patterns ────────────────────────────────────────────────────────

    fn visit_pattern(&mut self, pattern: &Pattern) -> Result<(), ValidationError> {
        match pattern {
            Pattern::Ident { name, span } => self.check_name(name, *span),
            Pattern::Array { elements, .. } => {
                for elem in elements.iter().flatten() {
                    self.visit_pattern(&elem.pattern)?;
                    if let Some(default) = &elem.default {
                        self.visit_expr(default)?;
                    }
                }
                Ok(())
            }
            Pattern::Object { props, .. } => {
                for prop in props {
                    self.check_prop_key(&prop.key, prop.span, true)?;
                    self.visit_pattern(&prop.binding)?;
                    if let Some(default) = &prop.default {
                        self.visit_expr(default)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn check_prop_key(
        &mut self,
        key: &PropKey,
        span: Span,
        in_pattern: bool,
    ) -> Result<(), ValidationError> {
        match key {
            PropKey::Ident(name) | PropKey::Str(name) => self.check_property_name(name, span),
            PropKey::Num(_) => Ok(()),
            PropKey::Computed(expr) => {
                if in_pattern
                    && self.enabled("computed-destructuring", self.rules.computed_destructuring)
                    && !matches!(**expr, Expr::Str { .. } | Expr::Number { .. })
                {
                    return Err(self.violation(
                        "computed-destructuring",
                        span,
                        "computed destructuring keys must be literals",
                    ));
                }
                self.check_folded(expr)?;
                self.visit_expr(expr)
            }
        }
    }

    // ─── Name checks ─────────────────────────────────────────────────────

    /// Check an identifier in reference or binding position.
    fn check_name(&self, name: &str, span: Span) -> Result<(), ValidationError> {
        let hard = HARD_FORBIDDEN_IDENTIFIERS.contains(&name)
            || self
                .config
                .extra_forbidden_identifiers
                .iter()
                .any(|f| f == name);
        let proto = PROTO_TOKENS.contains(&name) && self.level >= SecurityLevel::Secure;
        if self.enabled("disallowed-identifier", self.rules.forbidden_identifiers)
            && (hard || proto)
        {
            return Err(self.violation(
                "disallowed-identifier",
                span,
                format!("reference to denylisted identifier '{}'", name),
            ));
        }
        Ok(())
    }

    /// Check a static property name (member access or object key).
    fn check_property_name(&self, name: &str, span: Span) -> Result<(), ValidationError> {
        let hard = HARD_FORBIDDEN_IDENTIFIERS.contains(&name);
        let proto = PROTO_TOKENS.contains(&name) && self.level >= SecurityLevel::Secure;
        if self.enabled("disallowed-identifier", self.rules.forbidden_identifiers)
            && (hard || proto)
        {
            return Err(self.violation(
                "disallowed-identifier",
                span,
                format!("access to denylisted property '{}'", name),
            ));
        }
        Ok(())
    }

    fn const_resolver(&self) -> impl Fn(&str) -> Option<String> + '_ {
        move |name: &str| self.resolve_const(name)
    }

    /// Flag expressions that provably fold to a forbidden token.
    fn check_folded(&self, expr: &Expr) -> Result<(), ValidationError> {
        if !self.enabled("constructor-obfuscation", self.rules.constant_folding) {
            return Ok(());
        }
        let resolver = self.const_resolver();
        if let Some(folded) = fold_to_string(expr, &resolver) {
            if is_forbidden_token(&folded) {
                return Err(self.violation(
                    "constructor-obfuscation",
                    expr.span(),
                    format!("expression folds to forbidden token '{}'", folded),
                ));
            }
        }
        Ok(())
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), ValidationError> {
        match expr {
            Expr::Number { .. }
            | Expr::BigInt { .. }
            | Expr::Bool { .. }
            | Expr::Null { .. }
            | Expr::Undefined { .. } => Ok(()),
            Expr::Str { value, span } => {
                if self.enabled(
                    "forbidden-string-literal",
                    self.rules.forbidden_string_literals,
                ) && is_forbidden_token(value)
                {
                    return Err(self.violation(
                        "forbidden-string-literal",
                        *span,
                        format!("string literal equals forbidden token '{}'", value),
                    ));
                }
                Ok(())
            }
            Expr::Template { exprs, .. } => {
                self.check_folded(expr)?;
                for e in exprs {
                    self.visit_expr(e)?;
                }
                Ok(())
            }
            Expr::TaggedTemplate { span, .. } => {
                if self.enabled("dynamic-code", self.rules.dynamic_code) {
                    return Err(self.violation(
                        "dynamic-code",
                        *span,
                        "tagged template calls are not permitted",
                    ));
                }
                Ok(())
            }
            Expr::Regex { pattern, span, .. } => {
                if self.enabled("regex-literal", self.rules.redos_all_regex) {
                    return Err(self.violation(
                        "regex-literal",
                        *span,
                        "regex literals are not permitted at this level",
                    ));
                }
                if self.enabled(REDOS_RULE, self.rules.redos_nested)
                    && regex_is_suspicious(pattern)
                {
                    return Err(self.violation(
                        REDOS_RULE,
                        *span,
                        "regex literal exhibits catastrophic-backtracking shape",
                    ));
                }
                Ok(())
            }
            Expr::Ident { name, span } => {
                self.check_name(name, *span)?;
                if self.enabled("unknown-global", self.rules.unknown_globals)
                    && !self.is_bound(name)
                    && !self.allowed.contains(name)
                {
                    return Err(self.violation(
                        "unknown-global",
                        *span,
                        format!("unknown global '{}'", name),
                    ));
                }
                Ok(())
            }
            Expr::Array { elements, .. } => {
                for elem in elements {
                    match elem {
                        ArrayElem::Expr(e) | ArrayElem::Spread(e) => self.visit_expr(e)?,
                        ArrayElem::Hole => {}
                    }
                }
                Ok(())
            }
            Expr::Object { props, .. } => {
                for prop in props {
                    match prop {
                        ObjectProp::KeyValue { key, value, span } => {
                            self.check_prop_key(key, *span, false)?;
                            self.visit_expr(value)?;
                        }
                        ObjectProp::Shorthand { name, span } => {
                            self.check_name(name, *span)?;
                            if self.enabled("unknown-global", self.rules.unknown_globals)
                                && !self.is_bound(name)
                                && !self.allowed.contains(name.as_str())
                            {
                                return Err(self.violation(
                                    "unknown-global",
                                    *span,
                                    format!("unknown global '{}'", name),
                                ));
                            }
                        }
                        ObjectProp::Spread { arg, .. } => self.visit_expr(arg)?,
                    }
                }
                Ok(())
            }
            Expr::Function { func, span } => {
                if self.enabled("function-form", self.rules.function_forms) && !func.is_arrow {
                    return Err(self.violation(
                        "function-form",
                        *span,
                        "function expressions are not permitted; use arrow functions",
                    ));
                }
                self.visit_function(func)
            }
            Expr::Unary { arg, .. } => self.visit_expr(arg),
            Expr::Update { target, .. } => self.visit_assign_target(target),
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                if *op == BinaryOp::Exp {
                    if let Expr::BigInt { value, .. } = right.as_ref() {
                        if self.enabled("resource-bomb-bigint", self.rules.resource_bombs)
                            && *value > self.limits.max_bigint_exponent as i128
                        {
                            return Err(self.violation(
                                "resource-bomb-bigint",
                                *span,
                                format!(
                                    "bigint exponent {} exceeds limit {}",
                                    value, self.limits.max_bigint_exponent
                                ),
                            ));
                        }
                    }
                }
                self.check_folded(expr)?;
                self.visit_expr(left)?;
                self.visit_expr(right)
            }
            Expr::Logical { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)
            }
            Expr::Assign {
                target,
                value,
                span,
                ..
            } => {
                if let AssignTarget::Member {
                    property: MemberProp::Ident(name),
                    ..
                } = target
                {
                    if name == "length" {
                        if let Expr::Number { value: n, .. } = value.as_ref() {
                            if self.enabled("resource-bomb-array", self.rules.resource_bombs)
                                && *n > self.limits.max_array_alloc as f64
                            {
                                return Err(self.violation(
                                    "resource-bomb-array",
                                    *span,
                                    format!(
                                        "array length {} exceeds limit {}",
                                        n, self.limits.max_array_alloc
                                    ),
                                ));
                            }
                        }
                    }
                }
                self.visit_assign_target(target)?;
                self.visit_expr(value)
            }
            Expr::Cond {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.visit_expr(test)?;
                self.visit_expr(consequent)?;
                self.visit_expr(alternate)
            }
            Expr::Call {
                callee,
                args,
                span,
                ..
            } => {
                self.check_dynamic_code_call(callee, *span)?;
                self.check_repeat_bomb(callee, args, *span)?;
                self.check_folded(expr)?;
                self.visit_expr(callee)?;
                for arg in args {
                    match arg {
                        Arg::Expr(e) | Arg::Spread(e) => self.visit_expr(e)?,
                    }
                }
                Ok(())
            }
            Expr::New { callee, args, span } => {
                if let Expr::Ident { name, .. } = callee.as_ref() {
                    if name == "Function" && self.enabled("dynamic-code", self.rules.dynamic_code)
                    {
                        return Err(self.violation(
                            "dynamic-code",
                            *span,
                            "the Function constructor is not permitted",
                        ));
                    }
                    if name == "Array" {
                        if let Some(Arg::Expr(Expr::Number { value, .. })) = args.first() {
                            if self.enabled("resource-bomb-array", self.rules.resource_bombs)
                                && *value > self.limits.max_array_alloc as f64
                            {
                                return Err(self.violation(
                                    "resource-bomb-array",
                                    *span,
                                    format!(
                                        "array allocation {} exceeds limit {}",
                                        value, self.limits.max_array_alloc
                                    ),
                                ));
                            }
                        }
                    }
                }
                self.visit_expr(callee)?;
                for arg in args {
                    match arg {
                        Arg::Expr(e) | Arg::Spread(e) => self.visit_expr(e)?,
                    }
                }
                Ok(())
            }
            Expr::Member {
                object,
                property,
                span,
                ..
            } => {
                match property {
                    MemberProp::Ident(name) => {
                        self.check_property_name(name, *span)?;
                        self.check_meta_programming(object, name, *span)?;
                    }
                    MemberProp::Computed(inner) => {
                        self.check_folded_property(inner)?;
                        self.visit_expr(inner)?;
                    }
                }
                self.visit_expr(object)
            }
            Expr::Await { arg, .. } => self.visit_expr(arg),
            Expr::Yield { arg, .. } => {
                if let Some(arg) = arg {
                    self.visit_expr(arg)?;
                }
                Ok(())
            }
            Expr::AllocDebit { inner, .. } => self.visit_expr(inner),
        }
    }

    fn visit_assign_target(&mut self, target: &AssignTarget) -> Result<(), ValidationError> {
        match target {
            AssignTarget::Ident { name, span } => {
                self.check_name(name, *span)?;
                if self.enabled("unknown-global", self.rules.unknown_globals)
                    && !self.is_bound(name)
                    && !self.allowed.contains(name.as_str())
                {
                    return Err(self.violation(
                        "unknown-global",
                        *span,
                        format!("assignment to unknown global '{}'", name),
                    ));
                }
                Ok(())
            }
            AssignTarget::Member {
                object, property, ..
            } => {
                match property {
                    MemberProp::Ident(name) => {
                        self.check_property_name(name, target_member_span(target))?
                    }
                    MemberProp::Computed(inner) => {
                        self.check_folded_property(inner)?;
                        self.visit_expr(inner)?;
                    }
                }
                self.visit_expr(object)
            }
            AssignTarget::Pattern(pattern) => self.visit_pattern(pattern),
        }
    }

    /// Computed property expressions: a provably-forbidden folded value is
    /// an obfuscation violation; a bare string literal is caught by the
    /// literal rule during the normal visit.
    fn check_folded_property(&self, inner: &Expr) -> Result<(), ValidationError> {
        self.check_folded(inner)
    }

    fn check_dynamic_code_call(&self, callee: &Expr, span: Span) -> Result<(), ValidationError> {
        if !self.enabled("dynamic-code", self.rules.dynamic_code) {
            return Ok(());
        }
        if let Expr::Ident { name, .. } = callee {
            if name == "eval" || name == "Function" || name == "import" {
                return Err(self.violation(
                    "dynamic-code",
                    span,
                    format!("dynamic code generation via '{}' is not permitted", name),
                ));
            }
        }
        Ok(())
    }

    fn check_repeat_bomb(
        &self,
        callee: &Expr,
        args: &[Arg],
        span: Span,
    ) -> Result<(), ValidationError> {
        if !self.enabled("resource-bomb-repeat", self.rules.resource_bombs) {
            return Ok(());
        }
        if let Expr::Member {
            property: MemberProp::Ident(name),
            ..
        } = callee
        {
            if name == "repeat" {
                if let Some(Arg::Expr(Expr::Number { value, .. })) = args.first() {
                    if *value > self.limits.max_repeat_count as f64 {
                        return Err(self.violation(
                            "resource-bomb-repeat",
                            span,
                            format!(
                                "repeat count {} exceeds limit {}",
                                value, self.limits.max_repeat_count
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_meta_programming(
        &self,
        object: &Expr,
        member: &str,
        span: Span,
    ) -> Result<(), ValidationError> {
        if !self.enabled("meta-programming", self.rules.meta_programming) {
            return Ok(());
        }
        if let Expr::Ident { name, .. } = object {
            if name == "Object" && META_PROGRAMMING_MEMBERS.contains(&member) {
                return Err(self.violation(
                    "meta-programming",
                    span,
                    format!("Object.{} is not permitted", member),
                ));
            }
        }
        Ok(())
    }
}

fn target_member_span(target: &AssignTarget) -> Span {
    match target {
        AssignTarget::Ident { span, .. } => *span,
        AssignTarget::Member { span, .. } => *span,
        AssignTarget::Pattern(p) => p.span(),
    }
}

fn collect_pattern_names(pattern: &Pattern, out: &mut Vec<String>) {
    match pattern {
        Pattern::Ident { name, .. } => out.push(name.clone()),
        Pattern::Array { elements, .. } => {
            for elem in elements.iter().flatten() {
                collect_pattern_names(&elem.pattern, out);
            }
        }
        Pattern::Object { props, .. } => {
            for prop in props {
                collect_pattern_names(&prop.binding, out);
            }
        }
    }
}

fn is_always_truthy(expr: &Expr) -> bool {
    match expr {
        Expr::Bool { value, .. } => *value,
        Expr::Number { value, .. } => *value != 0.0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_lang::parse_program;

    fn validate_at(src: &str, level: SecurityLevel) -> Result<(), ValidationError> {
        let program = parse_program(src).unwrap();
        validate_program(
            src,
            &program,
            level,
            &[],
            ValidatorLimits::default(),
            &ValidatorRulesConfig::default(),
        )
    }

    fn rule_of(result: Result<(), ValidationError>) -> String {
        result.unwrap_err().rule
    }

    #[test]
    fn test_baseline_program_passes_secure() {
        assert!(validate_at("return 1 + 2;", SecurityLevel::Secure).is_ok());
        assert!(validate_at(
            "let s = 0; for (let i = 0; i < 10; i++) s += i; return s;",
            SecurityLevel::Secure
        )
        .is_ok());
    }

    #[test]
    fn test_forbidden_identifiers_rejected() {
        for src in [
            "return eval('1');",
            "const f = Function;",
            "return Reflect;",
            "return process;",
            "require('fs');",
            "return globalThis;",
        ] {
            assert!(
                validate_at(src, SecurityLevel::Standard).is_err(),
                "{} should be rejected",
                src
            );
        }
    }

    #[test]
    fn test_proto_tokens_only_rejected_at_secure() {
        let src = "return x.constructor;";
        // STANDARD: the membrane handles it at runtime.
        assert!(validate_at("let x = 1; return x;", SecurityLevel::Standard).is_ok());
        assert_eq!(
            rule_of(validate_at(src, SecurityLevel::Secure)),
            "disallowed-identifier"
        );
    }

    #[test]
    fn test_string_literal_token_rejected_at_secure() {
        let src = "const k = 'constructor'; return k;";
        assert!(validate_at(src, SecurityLevel::Standard).is_ok());
        assert_eq!(
            rule_of(validate_at(src, SecurityLevel::Secure)),
            "forbidden-string-literal"
        );
    }

    #[test]
    fn test_constructor_obfuscation_concat() {
        let src = "const k = 'con' + 'structor'; return Array[k] ? 1 : 0;";
        assert_eq!(
            rule_of(validate_at(src, SecurityLevel::Secure)),
            "constructor-obfuscation"
        );
    }

    #[test]
    fn test_constructor_obfuscation_via_const_chain() {
        let src = "const a = 'con'; const b = a + 'structor'; return b;";
        assert_eq!(
            rule_of(validate_at(src, SecurityLevel::Secure)),
            "constructor-obfuscation"
        );
    }

    #[test]
    fn test_char_code_obfuscation() {
        // String.fromCharCode for "__proto__"
        let src =
            "const k = String.fromCharCode(95,95,112,114,111,116,111,95,95); return k;";
        assert_eq!(
            rule_of(validate_at(src, SecurityLevel::Secure)),
            "constructor-obfuscation"
        );
    }

    #[test]
    fn test_computed_destructuring_rejected() {
        let src = "const {[key()]: x} = obj;";
        assert_eq!(
            rule_of(validate_at(src, SecurityLevel::Secure)),
            "computed-destructuring"
        );
    }

    #[test]
    fn test_meta_programming_rejected() {
        assert_eq!(
            rule_of(validate_at(
                "return Object.getPrototypeOf({});",
                SecurityLevel::Standard
            )),
            "meta-programming"
        );
    }

    #[test]
    fn test_resource_bombs_rejected_at_all_levels() {
        assert_eq!(
            rule_of(validate_at(
                "return new Array(10000000);",
                SecurityLevel::Permissive
            )),
            "resource-bomb-array"
        );
        assert_eq!(
            rule_of(validate_at(
                "return 'x'.repeat(99999999);",
                SecurityLevel::Permissive
            )),
            "resource-bomb-repeat"
        );
        assert_eq!(
            rule_of(validate_at("return 2n ** 99999n;", SecurityLevel::Permissive)),
            "resource-bomb-bigint"
        );
        assert_eq!(
            rule_of(validate_at("while (true) {}", SecurityLevel::Permissive)),
            "infinite-loop"
        );
        assert_eq!(
            rule_of(validate_at("for (;;) {}", SecurityLevel::Permissive)),
            "infinite-loop"
        );
        assert_eq!(
            rule_of(validate_at("while (1) {}", SecurityLevel::Permissive)),
            "infinite-loop"
        );
    }

    #[test]
    fn test_length_assignment_bomb() {
        assert_eq!(
            rule_of(validate_at(
                "let a = []; a.length = 99999999; return a;",
                SecurityLevel::Permissive
            )),
            "resource-bomb-array"
        );
    }

    #[test]
    fn test_dynamic_code_rejected_at_permissive() {
        assert_eq!(
            rule_of(validate_at("return eval('1+1');", SecurityLevel::Permissive)),
            "dynamic-code"
        );
        assert_eq!(
            rule_of(validate_at(
                "return new Function('return 1')();",
                SecurityLevel::Permissive
            )),
            "dynamic-code"
        );
        assert_eq!(
            rule_of(validate_at("tag`code`;", SecurityLevel::Permissive)),
            "dynamic-code"
        );
    }

    #[test]
    fn test_redos_prescan_below_secure() {
        assert_eq!(
            rule_of(validate_at("return /(a+)+$/.test(s);", SecurityLevel::Permissive)),
            "redos-regex"
        );
        // Benign regex passes below SECURE.
        assert!(validate_at("let s = 'x'; return /ab+c/.test(s);", SecurityLevel::Permissive).is_ok());
    }

    #[test]
    fn test_all_regex_rejected_at_secure() {
        assert_eq!(
            rule_of(validate_at("let s = 'x'; return /ab/.test(s);", SecurityLevel::Secure)),
            "regex-literal"
        );
    }

    #[test]
    fn test_function_forms_at_secure() {
        assert_eq!(
            rule_of(validate_at("function f() { return 1; }", SecurityLevel::Secure)),
            "function-form"
        );
        assert!(validate_at("const f = () => 1; return f();", SecurityLevel::Secure).is_ok());
        assert_eq!(
            rule_of(validate_at(
                "const g = function* () { yield 1; };",
                SecurityLevel::Secure
            )),
            "function-form"
        );
    }

    #[test]
    fn test_unknown_global_flagged() {
        let err = validate_at("return mystery;", SecurityLevel::Secure).unwrap_err();
        assert_eq!(err.rule, "unknown-global");
        assert!(err.unknown_global);
        // Bound names are fine.
        assert!(validate_at("let mystery = 1; return mystery;", SecurityLevel::Secure).is_ok());
    }

    #[test]
    fn test_injected_globals_are_known() {
        let src = "return config;";
        let program = parse_program(src).unwrap();
        assert!(validate_program(
            src,
            &program,
            SecurityLevel::Secure,
            &["config".to_string()],
            ValidatorLimits::default(),
            &ValidatorRulesConfig::default(),
        )
        .is_ok());
    }

    #[test]
    fn test_allowed_intrinsics_are_known() {
        assert!(validate_at(
            "return Math.max(1, JSON.parse('2'), Number('3'));",
            SecurityLevel::Secure
        )
        .is_ok());
    }

    #[test]
    fn test_escaped_identifier_string_caught() {
        // "\x63onstructor" decodes at lex time, literal rule fires.
        assert_eq!(
            rule_of(validate_at("const k = '\\x63onstructor'; return k;", SecurityLevel::Secure)),
            "forbidden-string-literal"
        );
    }

    #[test]
    fn test_violation_reports_location() {
        let err = validate_at("let a = 1;\nreturn eval('x');", SecurityLevel::Secure).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.snippet.contains("eval"));
    }

    #[test]
    fn test_rules_config_disables_optional_rule() {
        let src = "return /(a+)+$/.test('x');";
        let program = parse_program(src).unwrap();
        let config = ValidatorRulesConfig {
            disabled_rules: vec![REDOS_RULE.to_string()],
            ..Default::default()
        };
        assert!(validate_program(
            src,
            &program,
            SecurityLevel::Permissive,
            &[],
            ValidatorLimits::default(),
            &config,
        )
        .is_ok());
    }

    #[test]
    fn test_extra_forbidden_identifiers() {
        let src = "return fetch;";
        let program = parse_program(src).unwrap();
        let config = ValidatorRulesConfig {
            extra_forbidden_identifiers: vec!["fetch".to_string()],
            ..Default::default()
        };
        let err = validate_program(
            src,
            &program,
            SecurityLevel::Standard,
            &[],
            ValidatorLimits::default(),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.rule, "disallowed-identifier");
    }
}
