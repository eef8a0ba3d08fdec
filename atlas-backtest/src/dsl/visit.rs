//! Read-only traversal over the syntax tree.
//!
//! Implement [`Visitor`] and override the hooks you care about; call the
//! matching `walk_*` function from an override to keep descending.

use super::ast::{Expr, Program, Stmt, StmtKind};

pub trait Visitor {
    fn visit_program(&mut self, program: &Program) {
        for stmt in &program.body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Import(_) | StmtKind::FromImport { .. } => {}
        StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::Assign { targets, value } => {
            for target in targets {
                visitor.visit_expr(target);
            }
            visitor.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::Expr(expr) => visitor.visit_expr(expr),
        StmtKind::If { test, body, orelse } => {
            visitor.visit_expr(test);
            for s in body.iter().chain(orelse) {
                visitor.visit_stmt(s);
            }
        }
        StmtKind::For { target, iter, body } => {
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            for s in body {
                visitor.visit_stmt(s);
            }
        }
        StmtKind::While { test, body } => {
            visitor.visit_expr(test);
            for s in body {
                visitor.visit_stmt(s);
            }
        }
        StmtKind::Unsupported { exprs, body, .. } => {
            for e in exprs {
                visitor.visit_expr(e);
            }
            for s in body {
                visitor.visit_stmt(s);
            }
        }
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::None | Expr::Bool(_) | Expr::Number(_) | Expr::Str(_) | Expr::Name(_) => {}
        Expr::List(items) | Expr::Tuple(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                visitor.visit_expr(k);
                visitor.visit_expr(v);
            }
        }
        Expr::Attribute { value, .. } => visitor.visit_expr(value),
        Expr::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        Expr::Call { func, args, kwargs } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg);
            }
            for (_, value) in kwargs {
                visitor.visit_expr(value);
            }
        }
        Expr::Unary { operand, .. } => visitor.visit_expr(operand),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::BoolOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        Expr::ListComp {
            element,
            target,
            iter,
            conditions,
        } => {
            visitor.visit_expr(element);
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            for cond in conditions {
                visitor.visit_expr(cond);
            }
        }
        Expr::Unsupported { inner, .. } => {
            for e in inner {
                visitor.visit_expr(e);
            }
        }
    }
}
