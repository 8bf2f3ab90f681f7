// SPDX-License-Identifier: MIT

//! Node engine: variable pool, prompt templating, history windowing, response
//! parsing and the executable nodes built on top of them.

pub mod builder;
pub mod history;
pub mod loader;
pub mod node;
pub mod pool;
pub mod response;
pub mod template;
pub mod types;
