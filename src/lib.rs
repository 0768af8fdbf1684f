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

//! The C interface linked into instrumented programs.
//!
//! Each thread that calls into the runtime gets its own [`Runtime`],
//! created by `_sym_initialize` or lazily by the first `_sym_*` call.
//! Its Z3 context is leaked, so expressions handed out here stay valid
//! for the rest of the process. Every returned `Z3_ast` owns one Z3
//! reference that is never released, since the instrumentation has no
//! way of telling us when it is done with a value.
//!
//! Diverging inputs found at branches can be collected by registering
//! a callback with `_sym_set_witness_callback`.
//!
//! Errors are never reported back to the program. They are printed to
//! stderr and the process is aborted.

#[macro_use]
extern crate lazy_static;

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::process;
use std::ptr;
use std::slice;

use libc::{c_char, c_int, c_void};
use z3_sys::Z3_ast;

use symrt_lib::config::RuntimeConfig;
use symrt_lib::error::Error;
use symrt_lib::log;
use symrt_lib::path::Alternative;
use symrt_lib::runtime::Runtime;
use symrt_lib::smt::{Ast, Context, Witness};

lazy_static! {
    static ref CONFIG: Result<RuntimeConfig, String> = RuntimeConfig::from_env().map(|config| {
        config.install_log_flags();
        config
    });
}

/// Receives a diverging input rendered as TOML, together with the
/// `data` pointer given at registration.
pub type WitnessCallback = unsafe extern "C" fn(witness: *const c_char, data: *mut c_void);

thread_local! {
    static RUNTIME: RefCell<Option<Runtime<'static>>> = RefCell::new(None);
    static WITNESS_CALLBACK: Cell<Option<(WitnessCallback, *mut c_void)>> = Cell::new(None);
}

fn fatal(err: Error) -> ! {
    eprintln!("symrt: {}", err);
    process::abort()
}

fn new_runtime() -> Runtime<'static> {
    let config = match &*CONFIG {
        Ok(config) => config,
        Err(msg) => fatal(Error::Config(msg.clone())),
    };
    let ctx: &'static Context = Box::leak(Box::new(Context::new(config.z3_config())));
    Runtime::new(ctx)
}

/// Run `f` with the runtime of the current thread, creating it if
/// necessary.
pub fn with_runtime<F, A>(f: F) -> A
where
    F: FnOnce(&mut Runtime<'static>) -> A,
{
    RUNTIME.with(|cell| {
        let mut runtime = cell.borrow_mut();
        let runtime = runtime.get_or_insert_with(|| {
            let runtime = new_runtime();
            log!(log::VERBOSE, "Runtime used before _sym_initialize, initializing it now");
            runtime
        });
        f(runtime)
    })
}

fn run<F, A>(f: F) -> A
where
    F: FnOnce(&mut Runtime<'static>) -> Result<A, Error>,
{
    with_runtime(f).unwrap_or_else(|err| fatal(err))
}

unsafe fn expr(ctx: &'static Context, z3_ast: Z3_ast) -> Result<Ast<'static>, Error> {
    if z3_ast.is_null() {
        Err(Error::NullExpression)
    } else {
        Ok(Ast::from_raw(ctx, z3_ast))
    }
}

/// Null stands for a concrete value.
unsafe fn optional_expr(ctx: &'static Context, z3_ast: Z3_ast) -> Option<Ast<'static>> {
    if z3_ast.is_null() {
        None
    } else {
        Some(Ast::from_raw(ctx, z3_ast))
    }
}

fn raw_or_null(ast: Option<Ast<'static>>) -> Z3_ast {
    ast.map_or(ptr::null_mut(), Ast::into_raw)
}

#[no_mangle]
pub extern "C" fn _sym_initialize() {
    RUNTIME.with(|cell| {
        let mut runtime = cell.borrow_mut();
        if runtime.is_some() {
            log!(log::VERBOSE, "Runtime is already initialized");
        } else {
            *runtime = Some(new_runtime())
        }
    })
}

macro_rules! export_initialize_array {
    ($export:ident, $word:ty) => {
        /// # Safety
        ///
        /// `expression` must have room for `n_elements` handles and
        /// `value` must point to `n_elements` words.
        #[no_mangle]
        pub unsafe extern "C" fn $export(expression: *mut Z3_ast, value: *const c_void, n_elements: usize) {
            run(|rt| {
                if n_elements == 0 {
                    return Ok(());
                }
                if expression.is_null() || value.is_null() {
                    return Err(Error::NullExpression);
                }
                let values = slice::from_raw_parts(value.cast::<$word>(), n_elements);
                for (i, ast) in rt.initialize_array(values).into_iter().enumerate() {
                    *expression.add(i) = ast.into_raw()
                }
                Ok(())
            })
        }
    };
}

export_initialize_array!(_sym_initialize_array_8, u8);
export_initialize_array!(_sym_initialize_array_16, u16);
export_initialize_array!(_sym_initialize_array_32, u32);
export_initialize_array!(_sym_initialize_array_64, u64);

#[no_mangle]
pub extern "C" fn _sym_build_integer(value: u64, bits: u8) -> Z3_ast {
    run(|rt| Ok(rt.build_integer(value, bits)?.into_raw()))
}

/// Marks a value as symbolic. The concrete `value` is passed through
/// and the new variable becomes the return expression.
///
/// # Safety
///
/// `name` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn _sym_build_variable(name: *const c_char, value: u32, bits: u8) -> u32 {
    run(|rt| {
        if name.is_null() {
            return Err(Error::InvalidName("(null)".to_string()));
        }
        let name = CStr::from_ptr(name).to_string_lossy();
        rt.build_variable(&name, value, bits)
    })
}

#[no_mangle]
pub extern "C" fn _sym_build_null_pointer() -> Z3_ast {
    run(|rt| Ok(rt.build_null_pointer().into_raw()))
}

#[no_mangle]
pub extern "C" fn _sym_build_bool(value: bool) -> Z3_ast {
    run(|rt| Ok(rt.build_bool(value).into_raw()))
}

macro_rules! export_binary {
    ($export:ident, $builder:ident) => {
        /// # Safety
        ///
        /// Both arguments must be expressions created by this thread's
        /// runtime.
        #[no_mangle]
        pub unsafe extern "C" fn $export(a: Z3_ast, b: Z3_ast) -> Z3_ast {
            run(|rt| {
                let a = expr(rt.context(), a)?;
                let b = expr(rt.context(), b)?;
                Ok(rt.$builder(&a, &b).into_raw())
            })
        }
    };
}

export_binary!(_sym_build_add, build_add);
export_binary!(_sym_build_sub, build_sub);
export_binary!(_sym_build_mul, build_mul);
export_binary!(_sym_build_unsigned_div, build_unsigned_div);
export_binary!(_sym_build_signed_div, build_signed_div);
export_binary!(_sym_build_unsigned_rem, build_unsigned_rem);
export_binary!(_sym_build_signed_rem, build_signed_rem);
export_binary!(_sym_build_shift_left, build_shift_left);
export_binary!(_sym_build_logical_shift_right, build_logical_shift_right);
export_binary!(_sym_build_arithmetic_shift_right, build_arithmetic_shift_right);
export_binary!(_sym_build_and, build_and);
export_binary!(_sym_build_or, build_or);
export_binary!(_sym_build_xor, build_xor);
export_binary!(_sym_build_bool_and, build_bool_and);
export_binary!(_sym_build_bool_or, build_bool_or);

export_binary!(_sym_build_signed_less_than, build_signed_less_than);
export_binary!(_sym_build_signed_less_equal, build_signed_less_equal);
export_binary!(_sym_build_signed_greater_than, build_signed_greater_than);
export_binary!(_sym_build_signed_greater_equal, build_signed_greater_equal);
export_binary!(_sym_build_unsigned_less_than, build_unsigned_less_than);
export_binary!(_sym_build_unsigned_less_equal, build_unsigned_less_equal);
export_binary!(_sym_build_unsigned_greater_than, build_unsigned_greater_than);
export_binary!(_sym_build_unsigned_greater_equal, build_unsigned_greater_equal);
export_binary!(_sym_build_equal, build_equal);
export_binary!(_sym_build_not_equal, build_not_equal);

/// # Safety
///
/// `e` must be an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_build_neg(e: Z3_ast) -> Z3_ast {
    run(|rt| Ok(rt.build_neg(&expr(rt.context(), e)?).into_raw()))
}

/// # Safety
///
/// `e` must be an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_build_sext(e: Z3_ast, bits: u8) -> Z3_ast {
    run(|rt| Ok(rt.build_sext(&expr(rt.context(), e)?, bits).into_raw()))
}

/// # Safety
///
/// `e` must be an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_build_zext(e: Z3_ast, bits: u8) -> Z3_ast {
    run(|rt| Ok(rt.build_zext(&expr(rt.context(), e)?, bits).into_raw()))
}

/// # Safety
///
/// `e` must be an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_build_trunc(e: Z3_ast, bits: u8) -> Z3_ast {
    run(|rt| Ok(rt.build_trunc(&expr(rt.context(), e)?, bits)?.into_raw()))
}

/// # Safety
///
/// `e` must be null or an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_set_parameter_expression(index: u8, e: Z3_ast) {
    run(|rt| rt.set_parameter_expression(index as usize, optional_expr(rt.context(), e)))
}

#[no_mangle]
pub extern "C" fn _sym_get_parameter_expression(index: u8) -> Z3_ast {
    run(|rt| Ok(raw_or_null(rt.get_parameter_expression(index as usize)?)))
}

/// # Safety
///
/// `e` must be null or an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_set_return_expression(e: Z3_ast) {
    run(|rt| {
        rt.set_return_expression(optional_expr(rt.context(), e));
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn _sym_get_return_expression() -> Z3_ast {
    run(|rt| Ok(raw_or_null(rt.get_return_expression())))
}

/// Record that the program went down the `taken` side of a branch on
/// `constraint`, after looking for an input that takes the other
/// side. Returns the constraint added to the path.
///
/// # Safety
///
/// `constraint` must be a boolean expression created by this thread's
/// runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_push_path_constraint(constraint: Z3_ast, taken: c_int) -> Z3_ast {
    let (asserted, witness) = run(|rt| {
        let constraint = expr(rt.context(), constraint)?;
        let branch = rt.push_path_constraint(&constraint, taken != 0)?;
        let witness = match branch.alternative {
            Alternative::Diverging(witness) => Some(witness),
            _ => None,
        };
        Ok((branch.asserted.into_raw(), witness))
    });
    // Called with the runtime released, so the callback may use it
    if let Some(witness) = witness {
        report_witness(&witness)
    }
    asserted
}

fn render_witness(witness: &Witness) -> Result<CString, Error> {
    let text = toml::to_string(witness).map_err(|e| Error::Witness(e.to_string()))?;
    CString::new(text).map_err(|e| Error::Witness(e.to_string()))
}

fn report_witness(witness: &Witness) {
    if let Some((callback, data)) = WITNESS_CALLBACK.with(Cell::get) {
        let text = render_witness(witness).unwrap_or_else(|err| fatal(err));
        unsafe { callback(text.as_ptr(), data) }
    }
}

/// Register `callback` to be called with every diverging input found
/// on the calling thread. A null callback removes the registration.
#[no_mangle]
pub extern "C" fn _sym_set_witness_callback(callback: Option<WitnessCallback>, data: *mut c_void) {
    WITNESS_CALLBACK.with(|cell| cell.set(callback.map(|callback| (callback, data))))
}

/// # Safety
///
/// `shadow` must point to `length` slots, each null or an expression
/// created by this thread's runtime, and must stay valid until the
/// region is replaced.
#[no_mangle]
pub unsafe extern "C" fn _sym_register_memory(addr: usize, shadow: *mut Z3_ast, length: usize) {
    run(|rt| {
        rt.register_foreign_memory(addr, shadow, length)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn _sym_read_memory(addr: usize, length: usize, little_endian: bool) -> Z3_ast {
    run(|rt| Ok(rt.read_memory(addr, length, little_endian)?.into_raw()))
}

/// # Safety
///
/// `e` must be an expression created by this thread's runtime.
#[no_mangle]
pub unsafe extern "C" fn _sym_write_memory(addr: usize, e: Z3_ast, little_endian: bool) {
    run(|rt| {
        let e = expr(rt.context(), e)?;
        rt.write_memory(addr, &e, little_endian)
    })
}
