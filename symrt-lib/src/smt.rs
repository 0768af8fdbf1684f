// MIT License
//
// Copyright (c) 2019 Alasdair Armstrong
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation
// files (the "Software"), to deal in the Software without
// restriction, including without limitation the rights to use, copy,
// modify, merge, publish, distribute, sublicense, and/or sell copies
// of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! This module wraps the parts of the Z3 C API that the runtime
//! needs. Every Z3 object is reference counted, and the wrappers here
//! take care of incrementing and decrementing those counts, so an
//! [`Ast`] can be cloned and dropped like any other Rust value.

use libc::c_int;
use serde::{Serialize, Serializer};
use z3_sys::*;

use std::convert::TryInto;
use std::ffi::{CStr, CString};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ty {
    Bool,
    BitVec(u32),
}

/// Config is a wrapper around the `Z3_config` type from the C
/// API. `Z3_del_config` is called when it is dropped.
pub struct Config {
    z3_cfg: Z3_config,
}

impl Config {
    pub fn new() -> Self {
        unsafe { Config { z3_cfg: Z3_mk_config() } }
    }

    pub fn set_param_value(&self, id: &str, value: &str) -> Result<(), Error> {
        let id = CString::new(id).map_err(|_| Error::InvalidName(id.to_string()))?;
        let value = CString::new(value).map_err(|_| Error::InvalidName(value.to_string()))?;
        unsafe { Z3_set_param_value(self.z3_cfg, id.as_ptr(), value.as_ptr()) }
        Ok(())
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        unsafe { Z3_del_config(self.z3_cfg) }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Context is a wrapper around `Z3_context`.
pub struct Context {
    z3_ctx: Z3_context,
}

impl Context {
    pub fn new(cfg: Config) -> Self {
        unsafe { Context { z3_ctx: Z3_mk_context_rc(cfg.z3_cfg) } }
    }

    /// The raw context handle, for code that talks to Z3 directly.
    pub fn as_raw(&self) -> Z3_context {
        self.z3_ctx
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { Z3_del_context(self.z3_ctx) }
    }
}

struct Sort<'ctx> {
    z3_sort: Z3_sort,
    ctx: &'ctx Context,
}

impl<'ctx> Sort<'ctx> {
    fn new(ctx: &'ctx Context, ty: Ty) -> Self {
        unsafe {
            let z3_sort = match ty {
                Ty::Bool => Z3_mk_bool_sort(ctx.z3_ctx),
                Ty::BitVec(n) => Z3_mk_bv_sort(ctx.z3_ctx, n),
            };
            Z3_inc_ref(ctx.z3_ctx, Z3_sort_to_ast(ctx.z3_ctx, z3_sort));
            Sort { z3_sort, ctx }
        }
    }
}

impl<'ctx> Drop for Sort<'ctx> {
    fn drop(&mut self) {
        unsafe {
            let ctx = self.ctx.z3_ctx;
            Z3_dec_ref(ctx, Z3_sort_to_ast(ctx, self.z3_sort))
        }
    }
}

/// A symbolic expression owned by a [`Context`].
pub struct Ast<'ctx> {
    z3_ast: Z3_ast,
    ctx: &'ctx Context,
}

impl<'ctx> Clone for Ast<'ctx> {
    fn clone(&self) -> Self {
        unsafe {
            let z3_ast = self.z3_ast;
            Z3_inc_ref(self.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: self.ctx }
        }
    }
}

impl<'ctx> Drop for Ast<'ctx> {
    fn drop(&mut self) {
        unsafe { Z3_dec_ref(self.ctx.z3_ctx, self.z3_ast) }
    }
}

/// Two expressions are equal when Z3 considers them the same
/// (hash-consed) node.
impl<'ctx> PartialEq for Ast<'ctx> {
    fn eq(&self, other: &Ast<'ctx>) -> bool {
        unsafe { Z3_is_eq_ast(self.ctx.z3_ctx, self.z3_ast, other.z3_ast) }
    }
}

impl<'ctx> Eq for Ast<'ctx> {}

impl<'ctx> fmt::Display for Ast<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = unsafe { CStr::from_ptr(Z3_ast_to_string(self.ctx.z3_ctx, self.z3_ast)) };
        write!(f, "{}", s.to_string_lossy())
    }
}

impl<'ctx> fmt::Debug for Ast<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ast({})", self)
    }
}

macro_rules! z3_unary_op {
    ($i:ident, $arg:ident) => {
        unsafe {
            let z3_ast = $i($arg.ctx.z3_ctx, $arg.z3_ast);
            Z3_inc_ref($arg.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: $arg.ctx }
        }
    };
}

macro_rules! z3_binary_op {
    ($i:ident, $lhs:ident, $rhs:ident) => {
        unsafe {
            let z3_ast = $i($lhs.ctx.z3_ctx, $lhs.z3_ast, $rhs.z3_ast);
            Z3_inc_ref($lhs.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: $lhs.ctx }
        }
    };
}

impl<'ctx> Ast<'ctx> {
    /// Take a reference to an expression handed to us as a raw
    /// pointer, e.g. across the C interface.
    ///
    /// # Safety
    ///
    /// `z3_ast` must be a live, non-null expression belonging to `ctx`.
    pub unsafe fn from_raw(ctx: &'ctx Context, z3_ast: Z3_ast) -> Self {
        Z3_inc_ref(ctx.z3_ctx, z3_ast);
        Ast { z3_ast, ctx }
    }

    /// Give up this handle without releasing its reference, so the
    /// returned pointer stays valid for as long as the context lives.
    pub fn into_raw(self) -> Z3_ast {
        let z3_ast = self.z3_ast;
        std::mem::forget(self);
        z3_ast
    }

    pub fn as_raw(&self) -> Z3_ast {
        self.z3_ast
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn mk_bv_u64(ctx: &'ctx Context, sz: u32, bits: u64) -> Self {
        unsafe {
            let sort = Sort::new(ctx, Ty::BitVec(sz));
            let z3_ast = Z3_mk_unsigned_int64(ctx.z3_ctx, bits, sort.z3_sort);
            Z3_inc_ref(ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx }
        }
    }

    pub fn mk_bool(ctx: &'ctx Context, b: bool) -> Self {
        unsafe {
            let z3_ast = if b { Z3_mk_true(ctx.z3_ctx) } else { Z3_mk_false(ctx.z3_ctx) };
            Z3_inc_ref(ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx }
        }
    }

    /// Declare a constant named `name` of type `ty`.
    pub fn mk_const(ctx: &'ctx Context, name: &str, ty: Ty) -> Result<Self, Error> {
        let name = CString::new(name).map_err(|_| Error::InvalidName(name.to_string()))?;
        unsafe {
            let sort = Sort::new(ctx, ty);
            let sym = Z3_mk_string_symbol(ctx.z3_ctx, name.as_ptr());
            let z3_ast = Z3_mk_const(ctx.z3_ctx, sym, sort.z3_sort);
            Z3_inc_ref(ctx.z3_ctx, z3_ast);
            Ok(Ast { z3_ast, ctx })
        }
    }

    /// Declare a constant with a numeric symbol, printed by Z3 as `k!n`.
    pub fn mk_fresh(ctx: &'ctx Context, v: u32, ty: Ty) -> Self {
        unsafe {
            let sort = Sort::new(ctx, ty);
            let sym = Z3_mk_int_symbol(ctx.z3_ctx, v as c_int);
            let z3_ast = Z3_mk_const(ctx.z3_ctx, sym, sort.z3_sort);
            Z3_inc_ref(ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx }
        }
    }

    pub fn ty(&self) -> Option<Ty> {
        unsafe {
            let z3_ctx = self.ctx.z3_ctx;
            let sort = Z3_get_sort(z3_ctx, self.z3_ast);
            Z3_inc_ref(z3_ctx, Z3_sort_to_ast(z3_ctx, sort));
            let ty = match Z3_get_sort_kind(z3_ctx, sort) {
                SortKind::Bool => Some(Ty::Bool),
                SortKind::BV => Some(Ty::BitVec(Z3_get_bv_sort_size(z3_ctx, sort))),
                _ => None,
            };
            Z3_dec_ref(z3_ctx, Z3_sort_to_ast(z3_ctx, sort));
            ty
        }
    }

    /// The width of a bitvector expression, or `None` for anything
    /// that is not a bitvector.
    pub fn width(&self) -> Option<u32> {
        match self.ty() {
            Some(Ty::BitVec(sz)) => Some(sz),
            _ => None,
        }
    }

    pub fn is_bool(&self) -> bool {
        self.ty() == Some(Ty::Bool)
    }

    /// Returns `Some(b)` if this expression is literally `true` or `false`.
    pub fn as_bool(&self) -> Option<bool> {
        let value = unsafe { Z3_get_bool_value(self.ctx.z3_ctx, self.z3_ast) };
        if value == Z3_L_TRUE {
            Some(true)
        } else if value == Z3_L_FALSE {
            Some(false)
        } else {
            None
        }
    }

    /// The value of a bitvector numeral of at most 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        unsafe {
            if !Z3_is_numeral_ast(self.ctx.z3_ctx, self.z3_ast) {
                return None;
            }
        }
        self.get_numeral_u64().ok()
    }

    fn get_numeral_u64(&self) -> Result<u64, ErrorCode> {
        let mut v: u64 = 0;
        unsafe {
            if Z3_get_numeral_uint64(self.ctx.z3_ctx, self.z3_ast, &mut v) {
                Ok(v)
            } else {
                Err(Z3_get_error_code(self.ctx.z3_ctx))
            }
        }
    }

    pub fn simplify(&self) -> Self {
        z3_unary_op!(Z3_simplify, self)
    }

    pub fn extract(&self, hi: u32, lo: u32) -> Self {
        unsafe {
            let z3_ast = Z3_mk_extract(self.ctx.z3_ctx, hi, lo, self.z3_ast);
            Z3_inc_ref(self.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: self.ctx }
        }
    }

    pub fn zero_extend(&self, i: u32) -> Self {
        unsafe {
            let z3_ast = Z3_mk_zero_ext(self.ctx.z3_ctx, i, self.z3_ast);
            Z3_inc_ref(self.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: self.ctx }
        }
    }

    pub fn sign_extend(&self, i: u32) -> Self {
        unsafe {
            let z3_ast = Z3_mk_sign_ext(self.ctx.z3_ctx, i, self.z3_ast);
            Z3_inc_ref(self.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: self.ctx }
        }
    }

    pub fn mk_not(&self) -> Self {
        z3_unary_op!(Z3_mk_not, self)
    }

    pub fn mk_eq(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_eq, self, rhs)
    }

    pub fn mk_and(&self, rhs: &Ast<'ctx>) -> Self {
        unsafe {
            let z3_ast = Z3_mk_and(self.ctx.z3_ctx, 2, [self.z3_ast, rhs.z3_ast].as_ptr());
            Z3_inc_ref(self.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: self.ctx }
        }
    }

    pub fn mk_or(&self, rhs: &Ast<'ctx>) -> Self {
        unsafe {
            let z3_ast = Z3_mk_or(self.ctx.z3_ctx, 2, [self.z3_ast, rhs.z3_ast].as_ptr());
            Z3_inc_ref(self.ctx.z3_ctx, z3_ast);
            Ast { z3_ast, ctx: self.ctx }
        }
    }

    pub fn mk_bvnot(&self) -> Self {
        z3_unary_op!(Z3_mk_bvnot, self)
    }

    pub fn mk_bvand(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvand, self, rhs)
    }

    pub fn mk_bvor(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvor, self, rhs)
    }

    pub fn mk_bvxor(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvxor, self, rhs)
    }

    pub fn mk_bvadd(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvadd, self, rhs)
    }

    pub fn mk_bvsub(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvsub, self, rhs)
    }

    pub fn mk_bvmul(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvmul, self, rhs)
    }

    pub fn mk_bvudiv(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvudiv, self, rhs)
    }

    pub fn mk_bvsdiv(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvsdiv, self, rhs)
    }

    pub fn mk_bvurem(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvurem, self, rhs)
    }

    pub fn mk_bvsrem(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvsrem, self, rhs)
    }

    pub fn mk_bvult(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvult, self, rhs)
    }

    pub fn mk_bvslt(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvslt, self, rhs)
    }

    pub fn mk_bvule(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvule, self, rhs)
    }

    pub fn mk_bvsle(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvsle, self, rhs)
    }

    pub fn mk_bvuge(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvuge, self, rhs)
    }

    pub fn mk_bvsge(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvsge, self, rhs)
    }

    pub fn mk_bvugt(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvugt, self, rhs)
    }

    pub fn mk_bvsgt(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvsgt, self, rhs)
    }

    pub fn mk_bvshl(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvshl, self, rhs)
    }

    pub fn mk_bvlshr(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvlshr, self, rhs)
    }

    pub fn mk_bvashr(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_bvashr, self, rhs)
    }

    /// `self` becomes the most significant part of the result.
    pub fn mk_concat(&self, rhs: &Ast<'ctx>) -> Self {
        z3_binary_op!(Z3_mk_concat, self, rhs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtResult {
    Sat,
    Unsat,
    Unknown,
}

use SmtResult::*;

impl SmtResult {
    fn from_lbool(result: Z3_lbool) -> Self {
        if result == Z3_L_TRUE {
            Sat
        } else if result == Z3_L_FALSE {
            Unsat
        } else {
            Unknown
        }
    }

    pub fn is_sat(self) -> bool {
        self == Sat
    }

    pub fn is_unsat(self) -> bool {
        self == Unsat
    }
}

/// An incremental Z3 solver. Assertions accumulate until they are
/// discarded by leaving a [`SolverScope`].
///
/// ```
/// # use symrt_lib::smt::*;
/// let cfg = Config::new();
/// let ctx = Context::new(cfg);
/// let mut solver = Solver::new(&ctx);
/// let x = Ast::mk_fresh(&ctx, 0, Ty::Bool);
/// solver.assert(&x);
/// {
///     let mut scope = solver.scope();
///     scope.assert(&x.mk_not());
///     assert!(scope.check_sat() == SmtResult::Unsat)
/// }
/// assert!(solver.check_sat() == SmtResult::Sat)
/// ```
pub struct Solver<'ctx> {
    z3_solver: Z3_solver,
    ctx: &'ctx Context,
}

impl<'ctx> Drop for Solver<'ctx> {
    fn drop(&mut self) {
        unsafe {
            Z3_solver_dec_ref(self.ctx.z3_ctx, self.z3_solver);
        }
    }
}

impl<'ctx> Solver<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        unsafe {
            let z3_solver = Z3_mk_simple_solver(ctx.z3_ctx);
            Z3_solver_inc_ref(ctx.z3_ctx, z3_solver);
            Solver { ctx, z3_solver }
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn assert(&mut self, ast: &Ast<'ctx>) {
        unsafe {
            Z3_solver_assert(self.ctx.z3_ctx, self.z3_solver, ast.z3_ast);
        }
    }

    pub fn check_sat(&mut self) -> SmtResult {
        unsafe { SmtResult::from_lbool(Z3_solver_check(self.ctx.z3_ctx, self.z3_solver)) }
    }

    /// Check satisfiability of the current assertions together with
    /// `ast`, without asserting it.
    pub fn check_sat_with(&mut self, ast: &Ast<'ctx>) -> SmtResult {
        unsafe {
            SmtResult::from_lbool(Z3_solver_check_assumptions(self.ctx.z3_ctx, self.z3_solver, 1, &ast.z3_ast))
        }
    }

    /// Open a backtracking point. Everything asserted through the
    /// returned scope is retracted when it is dropped.
    pub fn scope(&mut self) -> SolverScope<'_, 'ctx> {
        unsafe { Z3_solver_push(self.ctx.z3_ctx, self.z3_solver) }
        SolverScope { solver: self }
    }

    pub fn num_scopes(&self) -> u32 {
        unsafe { Z3_solver_get_num_scopes(self.ctx.z3_ctx, self.z3_solver) }
    }

    pub fn num_assertions(&self) -> u32 {
        unsafe {
            let z3_ctx = self.ctx.z3_ctx;
            let assertions = Z3_solver_get_assertions(z3_ctx, self.z3_solver);
            Z3_ast_vector_inc_ref(z3_ctx, assertions);
            let n = Z3_ast_vector_size(z3_ctx, assertions);
            Z3_ast_vector_dec_ref(z3_ctx, assertions);
            n
        }
    }
}

impl<'ctx> fmt::Display for Solver<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = unsafe { CStr::from_ptr(Z3_solver_to_string(self.ctx.z3_ctx, self.z3_solver)) };
        write!(f, "{}", s.to_string_lossy())
    }
}

/// A pushed solver frame, popped again on drop.
pub struct SolverScope<'a, 'ctx> {
    solver: &'a mut Solver<'ctx>,
}

impl<'a, 'ctx> Deref for SolverScope<'a, 'ctx> {
    type Target = Solver<'ctx>;

    fn deref(&self) -> &Solver<'ctx> {
        &*self.solver
    }
}

impl<'a, 'ctx> DerefMut for SolverScope<'a, 'ctx> {
    fn deref_mut(&mut self) -> &mut Solver<'ctx> {
        &mut *self.solver
    }
}

impl<'a, 'ctx> Drop for SolverScope<'a, 'ctx> {
    fn drop(&mut self) {
        unsafe { Z3_solver_pop(self.solver.ctx.z3_ctx, self.solver.z3_solver, 1) }
    }
}

/// Interface for extracting information from Z3 models. Model
/// generation has to be enabled on the [`Config`] used to create the
/// context, which [`crate::config::RuntimeConfig::z3_config`] does.
pub struct Model<'ctx> {
    z3_model: Z3_model,
    ctx: &'ctx Context,
}

impl<'ctx> Drop for Model<'ctx> {
    fn drop(&mut self) {
        unsafe {
            Z3_model_dec_ref(self.ctx.z3_ctx, self.z3_model);
        }
    }
}

impl<'ctx> fmt::Display for Model<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = unsafe { CStr::from_ptr(Z3_model_to_string(self.ctx.z3_ctx, self.z3_model)) };
        write!(f, "{}", s.to_string_lossy())
    }
}

impl<'ctx> Model<'ctx> {
    /// Should only be called directly after a check that returned
    /// [`SmtResult::Sat`].
    pub fn new(solver: &Solver<'ctx>) -> Self {
        unsafe {
            let z3_model = Z3_solver_get_model(solver.ctx.z3_ctx, solver.z3_solver);
            Z3_model_inc_ref(solver.ctx.z3_ctx, z3_model);
            Model { z3_model, ctx: solver.ctx }
        }
    }

    /// Evaluate `ast` under this model, completing it for any
    /// unconstrained constants.
    pub fn eval(&self, ast: &Ast<'ctx>) -> Result<Ast<'ctx>, Error> {
        unsafe {
            let mut result: Z3_ast = ptr::null_mut();
            if !Z3_model_eval(self.ctx.z3_ctx, self.z3_model, ast.z3_ast, true, &mut result) {
                return Err(Error::Z3(Z3_get_error_code(self.ctx.z3_ctx)));
            }
            Ok(Ast::from_raw(self.ctx, result))
        }
    }

    fn get_large_bv(&self, ast: &Ast<'ctx>, size: u32) -> Result<Vec<bool>, Error> {
        let size: usize = size.try_into().map_err(|_| Error::Z3(ErrorCode::InvalidArg))?;
        let mut result = vec![false; size];
        let mut i = 0;
        while i < size {
            let hi = std::cmp::min(size, i + 64);
            let extract_ast = ast.extract((hi - 1) as u32, i as u32);
            let v = self.eval(&extract_ast)?.get_numeral_u64().map_err(Error::Z3)?;
            for (j, bit) in result.iter_mut().enumerate().take(hi).skip(i) {
                *bit = (v >> (j - i)) & 1 == 1
            }
            i += 64;
        }
        Ok(result)
    }

    fn value(&self, ast: &Ast<'ctx>) -> Result<Option<Value>, Error> {
        match ast.ty() {
            Some(Ty::Bool) => Ok(self.eval(ast)?.as_bool().map(Value::Bool)),
            Some(Ty::BitVec(size)) if size > 64 => Ok(Some(Value::Bits(self.get_large_bv(ast, size)?))),
            Some(Ty::BitVec(size)) => {
                let bits = self.eval(ast)?.get_numeral_u64().map_err(Error::Z3)?;
                Ok(Some(Value::Bits64 { bits, width: size }))
            }
            None => Ok(None),
        }
    }

    /// Collect the interpretation of every constant in the model.
    /// Constants of sorts other than booleans and bitvectors are
    /// skipped.
    pub fn witness(&self) -> Result<Witness, Error> {
        let mut assignments = Vec::new();
        unsafe {
            let z3_ctx = self.ctx.z3_ctx;
            for i in 0..Z3_model_get_num_consts(z3_ctx, self.z3_model) {
                let fd = Z3_model_get_const_decl(z3_ctx, self.z3_model, i);
                let sym = Z3_get_decl_name(z3_ctx, fd);
                let name = match Z3_get_symbol_kind(z3_ctx, sym) {
                    SymbolKind::String => {
                        CStr::from_ptr(Z3_get_symbol_string(z3_ctx, sym)).to_string_lossy().into_owned()
                    }
                    SymbolKind::Int => format!("k!{}", Z3_get_symbol_int(z3_ctx, sym)),
                };
                let z3_ast = Z3_model_get_const_interp(z3_ctx, self.z3_model, fd);
                if z3_ast.is_null() {
                    continue;
                }
                let ast = Ast::from_raw(self.ctx, z3_ast);
                if let Some(value) = self.value(&ast)? {
                    assignments.push(Assignment { name, value })
                }
            }
        }
        assignments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Witness { assignments })
    }
}

/// A concrete value assigned to a symbolic variable by a model.
/// Serialized as its SMT-LIB literal, e.g. `#x2a` or `true`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Bits64 { bits: u64, width: u32 },
    /// Bitvectors wider than 64 bits, least significant bit first.
    Bits(Vec<bool>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Bool(b) => Some(*b as u64),
            Value::Bits64 { bits, .. } => Some(*bits),
            Value::Bits(_) => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Bits64 { bits, width } => write!(f, "#x{:0w$x}", bits, w = ((*width as usize) + 3) / 4),
            Value::Bits(bits) => {
                write!(f, "#b")?;
                for bit in bits.iter().rev() {
                    write!(f, "{}", if *bit { '1' } else { '0' })?
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub name: String,
    pub value: Value,
}

/// An input that drives execution down a path not yet taken.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Witness {
    pub assignments: Vec<Assignment>,
}

impl Witness {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.assignments.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl fmt::Display for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, a) in self.assignments.iter().enumerate() {
            if i > 0 {
                writeln!(f)?
            }
            write!(f, "{} -> {}", a.name, a.value)?
        }
        Ok(())
    }
}
