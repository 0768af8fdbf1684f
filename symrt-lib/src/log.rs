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

//! Diagnostic output. Which messages are printed is controlled by a
//! global set of flags, normally taken from the `[log]` table of the
//! runtime configuration. Everything goes to stderr so the output of
//! the instrumented program itself is left alone.

use std::sync::atomic::{AtomicU32, Ordering::*};

pub static FLAGS: AtomicU32 = AtomicU32::new(0);

pub const VERBOSE: u32 = 1u32;
pub const MEMORY: u32 = 2u32;
pub const BRANCH: u32 = 4u32;
pub const SOLVER: u32 = 8u32;

pub fn set_flags(flags: u32) {
    FLAGS.store(flags, SeqCst);
}

/// Map a flag name as written in the configuration file to its bit.
pub fn flag_from_name(name: &str) -> Option<u32> {
    match name {
        "verbose" => Some(VERBOSE),
        "memory" => Some(MEMORY),
        "branch" => Some(BRANCH),
        "solver" => Some(SOLVER),
        _ => None,
    }
}

#[macro_export]
macro_rules! log {
    ($flags: expr, $msg: expr) => {
        if $crate::log::FLAGS.load(std::sync::atomic::Ordering::Relaxed) & $flags > 0u32 {
            eprintln!("[log]: {}", $msg)
        }
    };
}

#[macro_export]
macro_rules! if_logging {
    ($flags: expr, $body:block) => {
        if $crate::log::FLAGS.load(std::sync::atomic::Ordering::Relaxed) & $flags > 0u32 $body
    };
}
