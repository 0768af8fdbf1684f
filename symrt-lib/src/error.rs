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

use std::fmt;

use z3_sys::ErrorCode;

use crate::memory::Address;

#[derive(Debug)]
pub enum Error {
    /// Bitvectors must be at least one bit wide.
    ZeroWidth,
    /// Symbol names and Z3 parameters are passed as C strings, so
    /// they cannot contain NUL bytes.
    InvalidName(String),
    ArgumentOutOfRange(usize),
    ZeroLengthRead,
    /// No registered region contains the address.
    Unmapped(Address),
    /// The access starts inside a region but runs past its end.
    CrossRegion { address: Address, length: usize },
    OverlappingRegions,
    AddressOverflow { address: Address, length: usize },
    ShadowTooShort { length: usize, shadow: usize },
    /// The shadow slot for this address was never written.
    UninitializedShadow(Address),
    WidthMismatch { expected: u32, found: Option<u32> },
    /// Concrete execution went down a branch whose condition
    /// simplifies to the opposite constant.
    ImpossibleBranch { taken: bool },
    /// The path constraints became unsatisfiable after committing a
    /// branch that concrete execution actually took.
    InfeasiblePath(String),
    NullExpression,
    /// A diverging input could not be rendered for the witness
    /// callback.
    Witness(String),
    Z3(ErrorCode),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            ZeroWidth => write!(f, "Bitvector width must be non-zero"),
            InvalidName(name) => write!(f, "Invalid name {:?}", name),
            ArgumentOutOfRange(i) => write!(f, "Argument index {} is out of range", i),
            ZeroLengthRead => write!(f, "Invalid query for zero-length memory region"),
            Unmapped(addr) => write!(f, "Unknown memory region at {:#x}", addr),
            CrossRegion { address, length } => {
                write!(f, "Access of {} bytes at {:#x} crosses the end of its memory region", length, address)
            }
            OverlappingRegions => write!(f, "Overlapping memory regions"),
            AddressOverflow { address, length } => {
                write!(f, "Memory range of {} bytes at {:#x} overflows the address space", length, address)
            }
            ShadowTooShort { length, shadow } => {
                write!(f, "Shadow of {} expressions cannot back a region of {} bytes", shadow, length)
            }
            UninitializedShadow(addr) => write!(f, "No shadow expression for memory at {:#x}", addr),
            WidthMismatch { expected, found: Some(found) } => {
                write!(f, "Expected an expression of width {}, found width {}", expected, found)
            }
            WidthMismatch { expected, found: None } => {
                write!(f, "Expected an expression of width {}, found a non-bitvector", expected)
            }
            ImpossibleBranch { taken } => {
                write!(f, "We have taken an impossible branch (taken = {})", taken)
            }
            InfeasiblePath(constraint) => write!(f, "Asserting infeasible path constraint {}", constraint),
            NullExpression => write!(f, "Null expression passed to the runtime"),
            Witness(msg) => write!(f, "Cannot render witness: {}", msg),
            Z3(code) => write!(f, "Z3 error: {:?}", code),
            Config(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}
