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

//! This module loads the TOML file that configures the runtime. The
//! file is optional: when `SYMRT_CONFIG` is not set the runtime uses
//! [`RuntimeConfig::default`], which logs nothing and never times out.
//!
//! ```toml
//! [log]
//! flags = ["branch", "memory"]
//!
//! [solver]
//! timeout = 5000
//! ```

use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use toml::Value;

use crate::log;
use crate::smt::Config;

pub const CONFIG_VAR: &str = "SYMRT_CONFIG";

fn get_log_flags(config: &Value) -> Result<u32, String> {
    match config.get("log").and_then(|table| table.get("flags")) {
        None => Ok(0),
        Some(Value::Array(flags)) => flags.iter().try_fold(0, |acc, v| {
            let name = v.as_str().ok_or_else(|| "Each log flag must be a string value".to_string())?;
            match log::flag_from_name(name) {
                Some(flag) => Ok(acc | flag),
                None => Err(format!("Unknown log flag {}", name)),
            }
        }),
        Some(_) => Err("log.flags must be an array of strings".to_string()),
    }
}

fn get_solver_timeout(config: &Value) -> Result<Option<u32>, String> {
    match config.get("solver").and_then(|table| table.get("timeout")) {
        None => Ok(None),
        Some(Value::Integer(ms)) if *ms > 0 && *ms <= u32::MAX as i64 => Ok(Some(*ms as u32)),
        Some(v) => Err(format!("solver.timeout must be a positive number of milliseconds, found {}", v)),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Bitwise or of the flags in [`crate::log`]
    pub log_flags: u32,
    /// Per-query solver timeout in milliseconds. A branch query that
    /// times out reports [`crate::path::Alternative::Unknown`].
    pub solver_timeout: Option<u32>,
}

impl RuntimeConfig {
    pub fn parse(contents: &str) -> Result<Self, String> {
        let config = match contents.parse::<Value>() {
            Ok(config) => config,
            Err(e) => return Err(format!("Error when parsing configuration: {}", e)),
        };

        Ok(RuntimeConfig { log_flags: get_log_flags(&config)?, solver_timeout: get_solver_timeout(&config)? })
    }

    /// Load the configuration from a TOML file.
    pub fn from_file<P>(path: P) -> Result<Self, String>
    where
        P: AsRef<Path>,
    {
        let mut contents = String::new();
        match File::open(&path) {
            Ok(mut handle) => match handle.read_to_string(&mut contents) {
                Ok(_) => (),
                Err(e) => return Err(format!("Unexpected failure while reading config: {}", e)),
            },
            Err(e) => return Err(format!("Error when loading config '{}': {}", path.as_ref().display(), e)),
        };
        Self::parse(&contents)
    }

    /// Load the file named by the `SYMRT_CONFIG` environment
    /// variable, or use the default configuration if it is unset.
    pub fn from_env() -> Result<Self, String> {
        match env::var_os(CONFIG_VAR) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// The Z3 configuration for a runtime context. Models are always
    /// enabled, because every satisfiable branch query produces a witness.
    pub fn z3_config(&self) -> Config {
        let cfg = Config::new();
        // Neither parameter name nor value can contain a NUL byte
        let _ = cfg.set_param_value("model", "true");
        if let Some(ms) = self.solver_timeout {
            let _ = cfg.set_param_value("timeout", &ms.to_string());
        }
        cfg
    }

    pub fn install_log_flags(&self) {
        log::set_flags(self.log_flags)
    }
}
