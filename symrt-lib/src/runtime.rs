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

//! The [`Runtime`] holds all of the state an instrumented program
//! needs while it runs: the solver with the path constraints seen so
//! far, the slots used to pass expressions for function arguments and
//! return values, and the shadow memory. Expression construction lives
//! in [`crate::expr`] and branch handling in [`crate::path`].

use std::mem;

use crate::error::Error;
use crate::memory::{Address, Memory, Shadow};
use crate::smt::{Ast, Context, Solver};

pub const MAX_FUNCTION_ARGUMENTS: usize = 256;

pub struct Runtime<'ctx> {
    pub(crate) ctx: &'ctx Context,
    pub(crate) solver: Solver<'ctx>,
    pub(crate) null_pointer: Ast<'ctx>,
    pub(crate) return_value: Option<Ast<'ctx>>,
    function_arguments: Vec<Option<Ast<'ctx>>>,
    memory: Memory<Shadow<'ctx>>,
}

impl<'ctx> Runtime<'ctx> {
    /// Create a runtime using `ctx`, which should have been created
    /// from [`crate::config::RuntimeConfig::z3_config`] so that models
    /// are available.
    pub fn new(ctx: &'ctx Context) -> Self {
        let pointer_bits = (8 * mem::size_of::<usize>()) as u32;
        Runtime {
            ctx,
            solver: Solver::new(ctx),
            null_pointer: Ast::mk_bv_u64(ctx, pointer_bits, 0),
            return_value: None,
            function_arguments: vec![None; MAX_FUNCTION_ARGUMENTS],
            memory: Memory::new(),
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn solver(&self) -> &Solver<'ctx> {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut Solver<'ctx> {
        &mut self.solver
    }

    pub fn memory(&self) -> &Memory<Shadow<'ctx>> {
        &self.memory
    }

    pub fn set_parameter_expression(&mut self, index: usize, expr: Option<Ast<'ctx>>) -> Result<(), Error> {
        match self.function_arguments.get_mut(index) {
            Some(slot) => {
                *slot = expr;
                Ok(())
            }
            None => Err(Error::ArgumentOutOfRange(index)),
        }
    }

    /// Slots are never cleared, so this returns whatever was last
    /// stored at `index`, possibly by an unrelated call.
    pub fn get_parameter_expression(&self, index: usize) -> Result<Option<Ast<'ctx>>, Error> {
        self.function_arguments.get(index).cloned().ok_or(Error::ArgumentOutOfRange(index))
    }

    pub fn set_return_expression(&mut self, expr: Option<Ast<'ctx>>) {
        self.return_value = expr
    }

    pub fn get_return_expression(&self) -> Option<Ast<'ctx>> {
        self.return_value.clone()
    }

    /// Back `[address, address + length)` with `shadow`, evicting any
    /// overlapping regions. Returns how many regions were evicted.
    pub fn register_memory(&mut self, address: Address, shadow: Shadow<'ctx>, length: usize) -> Result<usize, Error> {
        if shadow.len() < length {
            return Err(Error::ShadowTooShort { length, shadow: shadow.len() });
        }
        Ok(self.memory.register(address, length, shadow)?.len())
    }

    /// Register an array of shadow expressions owned by the
    /// instrumented program.
    ///
    /// # Safety
    ///
    /// See [`Shadow::foreign`].
    pub unsafe fn register_foreign_memory(
        &mut self,
        address: Address,
        shadow: *mut z3_sys::Z3_ast,
        length: usize,
    ) -> Result<usize, Error> {
        if shadow.is_null() && length > 0 {
            return Err(Error::NullExpression);
        }
        self.register_memory(address, Shadow::foreign(self.ctx, shadow, length), length)
    }

    /// Build the expression for `length` bytes of memory starting at
    /// `address`. All bytes must lie in a single registered region.
    pub fn read_memory(&self, address: Address, length: usize, little_endian: bool) -> Result<Ast<'ctx>, Error> {
        let (region, offset) = self.memory.lookup(address, length)?;
        let mut expr = region.shadow.get(offset, address)?;
        for i in 1..length {
            let byte = region.shadow.get(offset + i, address + i)?;
            expr = if little_endian { byte.mk_concat(&expr) } else { expr.mk_concat(&byte) }
        }
        Ok(expr)
    }

    /// Split `expr` into bytes and store them in the shadow of the
    /// region holding `address`. The width of `expr` decides how many
    /// bytes are written.
    pub fn write_memory(&mut self, address: Address, expr: &Ast<'ctx>, little_endian: bool) -> Result<(), Error> {
        let width = expr.width();
        let length = match width {
            Some(w) if w > 0 && w % 8 == 0 => (w / 8) as usize,
            _ => return Err(Error::WidthMismatch { expected: 8 * (width.unwrap_or(0) / 8 + 1), found: width }),
        };
        let (region, offset) = self.memory.lookup_mut(address, length)?;
        for i in 0..length {
            let significance = (if little_endian { i } else { length - 1 - i }) as u32;
            let byte = expr.extract(8 * significance + 7, 8 * significance).simplify();
            region.shadow.set(offset + i, byte)
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::log;

    fn context() -> Context {
        Context::new(RuntimeConfig::default().z3_config())
    }

    #[test]
    fn null_pointer_width() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        assert_eq!(rt.null_pointer.width(), Some(8 * mem::size_of::<usize>() as u32));
        assert_eq!(rt.null_pointer.as_u64(), Some(0))
    }

    #[test]
    fn parameter_slots() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let e = Ast::mk_bv_u64(&ctx, 32, 42);
        assert_eq!(rt.get_parameter_expression(3).unwrap(), None);
        rt.set_parameter_expression(3, Some(e.clone())).unwrap();
        rt.set_parameter_expression(255, Some(e.clone())).unwrap();
        assert_eq!(rt.get_parameter_expression(3).unwrap(), Some(e.clone()));
        // Stale values persist until overwritten
        assert_eq!(rt.get_parameter_expression(3).unwrap(), Some(e.clone()));
        assert!(matches!(rt.set_parameter_expression(256, Some(e)), Err(Error::ArgumentOutOfRange(256))));
        assert!(matches!(rt.get_parameter_expression(1000), Err(Error::ArgumentOutOfRange(1000))))
    }

    #[test]
    fn return_slot() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        assert_eq!(rt.get_return_expression(), None);
        let e = Ast::mk_bv_u64(&ctx, 8, 1);
        rt.set_return_expression(Some(e.clone()));
        assert_eq!(rt.get_return_expression(), Some(e));
        rt.set_return_expression(None);
        assert_eq!(rt.get_return_expression(), None);
    }

    #[test]
    fn shadow_too_short() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let shadow = Shadow::Owned(vec![Ast::mk_bv_u64(&ctx, 8, 0); 2]);
        assert!(matches!(rt.register_memory(0x1000, shadow, 4), Err(Error::ShadowTooShort { length: 4, shadow: 2 })))
    }

    #[test]
    fn construction_leaves_log_flags_alone() {
        log::set_flags(log::MEMORY);
        let config = RuntimeConfig::parse("[log]\nflags = [\"solver\"]").unwrap();
        let ctx = Context::new(config.z3_config());
        let _rt = Runtime::new(&ctx);
        assert_eq!(log::FLAGS.load(std::sync::atomic::Ordering::SeqCst), log::MEMORY);
        log::set_flags(0)
    }

    #[test]
    fn eviction_count() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let zeros = |n| Shadow::Owned(vec![Ast::mk_bv_u64(&ctx, 8, 0); n]);
        assert_eq!(rt.register_memory(0x1000, zeros(4), 4).unwrap(), 0);
        assert_eq!(rt.register_memory(0x1004, zeros(4), 4).unwrap(), 0);
        assert_eq!(rt.register_memory(0x1002, zeros(4), 4).unwrap(), 2);
        assert_eq!(rt.memory().len(), 1)
    }

    #[test]
    fn single_byte_reads() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let bytes: Vec<Ast> = (0..8).map(|i| Ast::mk_fresh(&ctx, i, crate::smt::Ty::BitVec(8))).collect();
        rt.register_memory(0x4000, Shadow::Owned(bytes.clone()), 8).unwrap();
        for (i, byte) in bytes.iter().enumerate() {
            assert_eq!(&rt.read_memory(0x4000 + i, 1, true).unwrap(), byte);
            assert_eq!(&rt.read_memory(0x4000 + i, 1, false).unwrap(), byte)
        }
    }

    #[test]
    fn endianness() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let bytes = vec![0x11u64, 0x22, 0x33, 0x44].into_iter().map(|b| Ast::mk_bv_u64(&ctx, 8, b)).collect();
        rt.register_memory(0x1000, Shadow::Owned(bytes), 4).unwrap();
        let le = rt.read_memory(0x1000, 4, true).unwrap();
        let be = rt.read_memory(0x1000, 4, false).unwrap();
        assert_eq!(le.width(), Some(32));
        assert_eq!(le.simplify().as_u64(), Some(0x4433_2211));
        assert_eq!(be.simplify().as_u64(), Some(0x1122_3344));
        assert_eq!(rt.read_memory(0x1001, 2, true).unwrap().simplify().as_u64(), Some(0x3322));
    }

    #[test]
    fn read_failures() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let bytes = vec![Ast::mk_bv_u64(&ctx, 8, 0); 4];
        rt.register_memory(0x1000, Shadow::Owned(bytes), 4).unwrap();
        assert!(matches!(rt.read_memory(0x1000, 0, true), Err(Error::ZeroLengthRead)));
        assert!(matches!(rt.read_memory(0x1002, 4, true), Err(Error::CrossRegion { .. })));
        assert!(matches!(rt.read_memory(0x0fff, 1, true), Err(Error::Unmapped(0x0fff))));
        assert!(matches!(rt.read_memory(0x1004, 1, true), Err(Error::Unmapped(0x1004))))
    }

    #[test]
    fn write_then_read() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        let bytes = vec![Ast::mk_bv_u64(&ctx, 8, 0); 8];
        rt.register_memory(0x1000, Shadow::Owned(bytes), 8).unwrap();
        rt.write_memory(0x1002, &Ast::mk_bv_u64(&ctx, 32, 0xdead_beef), true).unwrap();
        assert_eq!(rt.read_memory(0x1002, 4, true).unwrap().simplify().as_u64(), Some(0xdead_beef));
        assert_eq!(rt.read_memory(0x1002, 1, true).unwrap().simplify().as_u64(), Some(0xef));
        rt.write_memory(0x1000, &Ast::mk_bv_u64(&ctx, 16, 0x1234), false).unwrap();
        assert_eq!(rt.read_memory(0x1000, 1, true).unwrap().simplify().as_u64(), Some(0x12));
        assert_eq!(rt.read_memory(0x1000, 2, false).unwrap().simplify().as_u64(), Some(0x1234));
        assert!(matches!(
            rt.write_memory(0x1000, &Ast::mk_bv_u64(&ctx, 12, 0), true),
            Err(Error::WidthMismatch { found: Some(12), .. })
        ));
        assert!(matches!(rt.write_memory(0x1006, &Ast::mk_bv_u64(&ctx, 32, 0), true), Err(Error::CrossRegion { .. })))
    }

    #[test]
    fn foreign_shadow() {
        let ctx = context();
        let mut shadow: Vec<z3_sys::Z3_ast> = vec![std::ptr::null_mut(); 4];
        shadow[0] = Ast::mk_bv_u64(&ctx, 8, 0xaa).into_raw();
        shadow[1] = Ast::mk_bv_u64(&ctx, 8, 0xbb).into_raw();
        let ptr = shadow.as_mut_ptr();
        let mut rt = Runtime::new(&ctx);
        unsafe { rt.register_foreign_memory(0x2000, ptr, 4).unwrap() };
        assert_eq!(rt.read_memory(0x2000, 2, true).unwrap().simplify().as_u64(), Some(0xbbaa));
        assert!(matches!(rt.read_memory(0x2000, 4, true), Err(Error::UninitializedShadow(0x2002))));
        // Writes made by the program after registration are visible
        unsafe { *ptr.add(2) = Ast::mk_bv_u64(&ctx, 8, 0xcc).into_raw() };
        assert_eq!(rt.read_memory(0x2001, 2, true).unwrap().simplify().as_u64(), Some(0xccbb));
        rt.write_memory(0x2002, &Ast::mk_bv_u64(&ctx, 16, 0xeeff), true).unwrap();
        assert_eq!(rt.read_memory(0x2000, 4, false).unwrap().simplify().as_u64(), Some(0xaabb_ffee));
    }
}
