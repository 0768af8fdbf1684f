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

//! Expression construction for the instrumentation. Each method
//! corresponds to one kind of operation in the instrumented program,
//! and simply builds the matching Z3 term. Operand widths are not
//! checked here; mixing widths is a bug in the instrumentation and Z3
//! will report it.

use crate::error::Error;
use crate::runtime::Runtime;
use crate::smt::{Ast, Ty};

/// Fixed-width unsigned integers that can seed shadow memory with
/// concrete values.
pub trait ConcreteWord: Copy {
    const BITS: u32;

    fn to_u64(self) -> u64;
}

macro_rules! concrete_word {
    ($ty:ty) => {
        impl ConcreteWord for $ty {
            const BITS: u32 = <$ty>::BITS;

            fn to_u64(self) -> u64 {
                self as u64
            }
        }
    };
}

concrete_word!(u8);
concrete_word!(u16);
concrete_word!(u32);
concrete_word!(u64);

fn width(bits: u8) -> Result<u32, Error> {
    if bits == 0 {
        Err(Error::ZeroWidth)
    } else {
        Ok(bits as u32)
    }
}

macro_rules! binary_builder {
    ($name:ident, $mk:ident) => {
        pub fn $name(&self, a: &Ast<'ctx>, b: &Ast<'ctx>) -> Ast<'ctx> {
            a.$mk(b)
        }
    };
}

impl<'ctx> Runtime<'ctx> {
    pub fn build_integer(&self, value: u64, bits: u8) -> Result<Ast<'ctx>, Error> {
        Ok(Ast::mk_bv_u64(self.ctx, width(bits)?, value))
    }

    pub fn build_bool(&self, value: bool) -> Ast<'ctx> {
        Ast::mk_bool(self.ctx, value)
    }

    /// Mark a value as symbolic. The concrete `value` is returned
    /// unchanged, and a fresh variable called `name` is placed in the
    /// return slot, where the instrumentation picks it up as the
    /// expression for the result of this call.
    pub fn build_variable(&mut self, name: &str, value: u32, bits: u8) -> Result<u32, Error> {
        let var = Ast::mk_const(self.ctx, name, Ty::BitVec(width(bits)?))?;
        self.return_value = Some(var);
        Ok(value)
    }

    pub fn build_null_pointer(&self) -> Ast<'ctx> {
        self.null_pointer.clone()
    }

    /// One concrete expression per element of `values`.
    pub fn initialize_array<W: ConcreteWord>(&self, values: &[W]) -> Vec<Ast<'ctx>> {
        values.iter().map(|v| Ast::mk_bv_u64(self.ctx, W::BITS, v.to_u64())).collect()
    }

    binary_builder!(build_add, mk_bvadd);
    binary_builder!(build_sub, mk_bvsub);
    binary_builder!(build_mul, mk_bvmul);
    binary_builder!(build_unsigned_div, mk_bvudiv);
    binary_builder!(build_signed_div, mk_bvsdiv);
    binary_builder!(build_unsigned_rem, mk_bvurem);
    binary_builder!(build_signed_rem, mk_bvsrem);
    binary_builder!(build_shift_left, mk_bvshl);
    binary_builder!(build_logical_shift_right, mk_bvlshr);
    binary_builder!(build_arithmetic_shift_right, mk_bvashr);
    binary_builder!(build_and, mk_bvand);
    binary_builder!(build_or, mk_bvor);
    binary_builder!(build_xor, mk_bvxor);
    binary_builder!(build_bool_and, mk_and);
    binary_builder!(build_bool_or, mk_or);

    binary_builder!(build_signed_less_than, mk_bvslt);
    binary_builder!(build_signed_less_equal, mk_bvsle);
    binary_builder!(build_signed_greater_than, mk_bvsgt);
    binary_builder!(build_signed_greater_equal, mk_bvsge);
    binary_builder!(build_unsigned_less_than, mk_bvult);
    binary_builder!(build_unsigned_less_equal, mk_bvule);
    binary_builder!(build_unsigned_greater_than, mk_bvugt);
    binary_builder!(build_unsigned_greater_equal, mk_bvuge);
    binary_builder!(build_equal, mk_eq);

    pub fn build_not_equal(&self, a: &Ast<'ctx>, b: &Ast<'ctx>) -> Ast<'ctx> {
        a.mk_eq(b).mk_not()
    }

    /// Bitwise complement: `not` for booleans, `bvnot` for bitvectors.
    pub fn build_neg(&self, expr: &Ast<'ctx>) -> Ast<'ctx> {
        if expr.is_bool() {
            expr.mk_not()
        } else {
            expr.mk_bvnot()
        }
    }

    /// Add `bits` copies of the sign bit.
    pub fn build_sext(&self, expr: &Ast<'ctx>, bits: u8) -> Ast<'ctx> {
        expr.sign_extend(bits as u32)
    }

    /// Add `bits` zero bits at the top.
    pub fn build_zext(&self, expr: &Ast<'ctx>, bits: u8) -> Ast<'ctx> {
        expr.zero_extend(bits as u32)
    }

    /// Keep the low `bits` bits.
    pub fn build_trunc(&self, expr: &Ast<'ctx>, bits: u8) -> Result<Ast<'ctx>, Error> {
        Ok(expr.extract(width(bits)? - 1, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::smt::{Context, SmtResult};

    fn context() -> Context {
        Context::new(RuntimeConfig::default().z3_config())
    }

    #[test]
    fn integers() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        let i = rt.build_integer(300, 16).unwrap();
        assert_eq!(i.width(), Some(16));
        assert_eq!(i.as_u64(), Some(300));
        // Values wider than the requested width wrap around
        assert_eq!(rt.build_integer(0x1ff, 8).unwrap().as_u64(), Some(0xff));
        assert!(matches!(rt.build_integer(1, 0), Err(Error::ZeroWidth)))
    }

    #[test]
    fn variables_go_to_the_return_slot() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        assert_eq!(rt.build_variable("input", 17, 32).unwrap(), 17);
        let var = rt.get_return_expression().unwrap();
        assert_eq!(var.width(), Some(32));
        assert_eq!(format!("{}", var), "input");
        assert!(matches!(rt.build_variable("bad\0name", 0, 8), Err(Error::InvalidName(_))))
    }

    #[test]
    fn arithmetic_wraps() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        let a = rt.build_integer(200, 8).unwrap();
        let b = rt.build_integer(100, 8).unwrap();
        assert_eq!(rt.build_add(&a, &b).simplify().as_u64(), Some(44));
        assert_eq!(rt.build_mul(&a, &b).simplify().as_u64(), Some((200u32 * 100 % 256) as u64));
        assert_eq!(rt.build_sub(&b, &a).simplify().as_u64(), Some(156));
        let seven = rt.build_integer(7, 8).unwrap();
        let minus_seven = rt.build_integer(0xf9, 8).unwrap();
        let three = rt.build_integer(3, 8).unwrap();
        // srem takes the sign of the dividend
        assert_eq!(rt.build_signed_rem(&minus_seven, &three).simplify().as_u64(), Some(0xff));
        assert_eq!(rt.build_signed_rem(&seven, &three).simplify().as_u64(), Some(1));
        assert_eq!(rt.build_shift_left(&seven, &three).simplify().as_u64(), Some(56));
        assert_eq!(rt.build_logical_shift_right(&minus_seven, &three).simplify().as_u64(), Some(0x1f));
        assert_eq!(rt.build_arithmetic_shift_right(&minus_seven, &three).simplify().as_u64(), Some(0xff));
    }

    #[test]
    fn comparisons() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        let one = rt.build_integer(1, 8).unwrap();
        let minus_one = rt.build_integer(0xff, 8).unwrap();
        let is = |e: Ast| e.simplify().as_bool();
        assert_eq!(is(rt.build_signed_less_than(&minus_one, &one)), Some(true));
        assert_eq!(is(rt.build_unsigned_less_than(&minus_one, &one)), Some(false));
        assert_eq!(is(rt.build_signed_less_equal(&one, &one)), Some(true));
        assert_eq!(is(rt.build_signed_greater_than(&one, &minus_one)), Some(true));
        assert_eq!(is(rt.build_signed_greater_equal(&minus_one, &one)), Some(false));
        assert_eq!(is(rt.build_unsigned_less_equal(&one, &minus_one)), Some(true));
        assert_eq!(is(rt.build_unsigned_greater_than(&minus_one, &one)), Some(true));
        assert_eq!(is(rt.build_unsigned_greater_equal(&one, &minus_one)), Some(false));
        assert_eq!(is(rt.build_equal(&one, &one)), Some(true));
        assert_eq!(is(rt.build_not_equal(&one, &one)), Some(false));
        assert!(rt.build_equal(&one, &minus_one).is_bool())
    }

    #[test]
    fn neg_is_bitwise_complement() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        let x = rt.build_integer(0x0f, 8).unwrap();
        assert_eq!(rt.build_neg(&x).simplify().as_u64(), Some(0xf0));
        let t = rt.build_bool(true);
        assert_eq!(rt.build_neg(&t).simplify().as_bool(), Some(false));
    }

    #[test]
    fn casts() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        let minus_two = rt.build_integer(0xfe, 8).unwrap();
        assert_eq!(rt.build_sext(&minus_two, 8).simplify().as_u64(), Some(0xfffe));
        assert_eq!(rt.build_zext(&minus_two, 8).simplify().as_u64(), Some(0x00fe));
        let wide = rt.build_integer(0x1234, 16).unwrap();
        let narrow = rt.build_trunc(&wide, 8).unwrap();
        assert_eq!(narrow.width(), Some(8));
        assert_eq!(narrow.simplify().as_u64(), Some(0x34));
        assert!(matches!(rt.build_trunc(&wide, 0), Err(Error::ZeroWidth)))
    }

    #[test]
    fn extend_then_truncate() {
        let ctx = context();
        let mut rt = Runtime::new(&ctx);
        rt.build_variable("x", 0, 8).unwrap();
        let x = rt.get_return_expression().unwrap();
        let zext_round_trip = rt.build_trunc(&rt.build_zext(&x, 24), 8).unwrap();
        let sext_round_trip = rt.build_trunc(&rt.build_sext(&x, 24), 8).unwrap();
        // Both must equal x for every x
        let solver = rt.solver_mut();
        assert_eq!(solver.check_sat_with(&zext_round_trip.mk_eq(&x).mk_not()), SmtResult::Unsat);
        assert_eq!(solver.check_sat_with(&sext_round_trip.mk_eq(&x).mk_not()), SmtResult::Unsat);
    }

    #[test]
    fn bulk_initialization() {
        let ctx = context();
        let rt = Runtime::new(&ctx);
        let exprs = rt.initialize_array(&[1u16, 2, 0xffff]);
        assert_eq!(exprs.len(), 3);
        assert!(exprs.iter().all(|e| e.width() == Some(16)));
        assert_eq!(exprs[2].as_u64(), Some(0xffff));
        assert_eq!(rt.initialize_array(&[u64::MAX])[0].as_u64(), Some(u64::MAX));
        assert_eq!(rt.initialize_array(&[7u8])[0].width(), Some(8));
        assert!(rt.initialize_array::<u32>(&[]).is_empty())
    }
}
