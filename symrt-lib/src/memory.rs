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

//! Shadow memory is split up into regions defined by a half-open
//! range between two addresses `[start, end)`. Each region is backed
//! by one shadow expression per byte. We assume there can only ever be
//! a single allocation per address, so regions never overlap: when a
//! new region is registered, every region it intersects is evicted
//! first.
//!
//! [`Memory`] itself does not care what the shadow storage is, which
//! lets the runtime use caller-owned arrays (see [`Shadow`]) as well
//! as vectors it owns.

use std::collections::BTreeMap;
use std::ops::Range;

use z3_sys::Z3_ast;

use crate::error::Error;
use crate::log;
use crate::smt::{Ast, Context};

pub type Address = usize;

pub struct Region<S> {
    pub range: Range<Address>,
    pub shadow: S,
}

impl<S> Region<S> {
    pub fn start(&self) -> Address {
        self.range.start
    }

    pub fn end(&self) -> Address {
        self.range.end
    }

    pub fn len(&self) -> usize {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.range.contains(&addr)
    }
}

/// The set of known memory regions, ordered by start address.
pub struct Memory<S> {
    regions: BTreeMap<Address, Region<S>>,
}

impl<S> Default for Memory<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_range(address: Address, length: usize) -> Result<Range<Address>, Error> {
    match address.checked_add(length) {
        Some(top) => Ok(address..top),
        None => Err(Error::AddressOverflow { address, length }),
    }
}

impl<S> Memory<S> {
    pub fn new() -> Self {
        Memory { regions: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region<S>> {
        self.regions.values()
    }

    /// Make sure no two regions overlap.
    pub fn check_invariant(&self) -> Result<(), Error> {
        let mut last_end = 0;
        for region in self.regions.values() {
            if region.start() < last_end {
                return Err(Error::OverlappingRegions);
            }
            last_end = region.end()
        }
        Ok(())
    }

    /// Start addresses of all regions intersecting `range`.
    fn overlapping(&self, range: &Range<Address>) -> Vec<Address> {
        let mut starts = Vec::new();
        // At most one region starting below the range can reach into it
        if let Some((start, region)) = self.regions.range(..range.start).next_back() {
            if region.end() > range.start {
                starts.push(*start)
            }
        }
        starts.extend(self.regions.range(range.clone()).map(|(start, _)| *start));
        starts
    }

    /// Register `[address, address + length)`, evicting any regions
    /// it overlaps. Returns the evicted regions. An empty range
    /// overlaps nothing and is not recorded.
    pub fn register(&mut self, address: Address, length: usize, shadow: S) -> Result<Vec<Region<S>>, Error> {
        self.check_invariant()?;
        let range = checked_range(address, length)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let evicted: Vec<Region<S>> =
            self.overlapping(&range).into_iter().filter_map(|start| self.regions.remove(&start)).collect();
        log!(log::MEMORY, &format!("Erasing {} memory objects", evicted.len()));

        self.regions.insert(address, Region { range, shadow });
        Ok(evicted)
    }

    /// The unique region containing `address`, if any.
    pub fn find(&self, address: Address) -> Option<&Region<S>> {
        self.regions.range(..=address).next_back().map(|(_, region)| region).filter(|region| region.contains(address))
    }

    /// Find the region holding all of `[address, address + length)`,
    /// returning it together with the offset of `address` inside it.
    pub fn lookup(&self, address: Address, length: usize) -> Result<(&Region<S>, usize), Error> {
        self.check_invariant()?;
        if length == 0 {
            return Err(Error::ZeroLengthRead);
        }
        let range = checked_range(address, length)?;
        let region = self.find(address).ok_or(Error::Unmapped(address))?;
        if range.end > region.end() {
            return Err(Error::CrossRegion { address, length });
        }
        Ok((region, address - region.start()))
    }

    /// Like [`Memory::lookup`], but gives mutable access to the shadow.
    pub fn lookup_mut(&mut self, address: Address, length: usize) -> Result<(&mut Region<S>, usize), Error> {
        let start = self.lookup(address, length)?.0.start();
        match self.regions.get_mut(&start) {
            Some(region) => Ok((region, address - start)),
            None => Err(Error::Unmapped(address)),
        }
    }
}

/// Per-byte shadow expressions backing a region.
pub enum Shadow<'ctx> {
    Owned(Vec<Ast<'ctx>>),
    /// An array owned by the instrumented program. Slots are raw Z3
    /// expressions, and a null slot means the byte has never been
    /// written.
    Foreign { ctx: &'ctx Context, ptr: *mut Z3_ast, len: usize },
}

impl<'ctx> Shadow<'ctx> {
    /// # Safety
    ///
    /// `ptr` must point to `len` initialized (possibly null) slots
    /// that stay valid for as long as the region is registered, and
    /// every non-null slot must be an expression of `ctx`.
    pub unsafe fn foreign(ctx: &'ctx Context, ptr: *mut Z3_ast, len: usize) -> Self {
        Shadow::Foreign { ctx, ptr, len }
    }

    pub fn len(&self) -> usize {
        match self {
            Shadow::Owned(bytes) => bytes.len(),
            Shadow::Foreign { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The expression for the byte at `offset`. `address` is only
    /// used for error reporting.
    pub fn get(&self, offset: usize, address: Address) -> Result<Ast<'ctx>, Error> {
        match self {
            Shadow::Owned(bytes) => bytes.get(offset).cloned().ok_or(Error::UninitializedShadow(address)),
            Shadow::Foreign { ctx, ptr, len } => {
                if offset >= *len {
                    return Err(Error::UninitializedShadow(address));
                }
                let z3_ast = unsafe { *ptr.add(offset) };
                if z3_ast.is_null() {
                    Err(Error::UninitializedShadow(address))
                } else {
                    Ok(unsafe { Ast::from_raw(ctx, z3_ast) })
                }
            }
        }
    }

    pub fn set(&mut self, offset: usize, byte: Ast<'ctx>) {
        match self {
            Shadow::Owned(bytes) => bytes[offset] = byte,
            // The previous occupant of the slot is not released, since
            // the program may still hold copies of the pointer.
            Shadow::Foreign { ptr, .. } => unsafe { *ptr.add(offset) = byte.into_raw() },
        }
    }
}
