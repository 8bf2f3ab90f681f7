// SPDX-License-Identifier: MIT

//! Provider-facing kit: capabilities the node engine calls out to, the
//! configuration that builds them, the tracing span and the error types.

pub mod config;
pub mod error;
pub mod knowledge;
pub mod model;
pub mod trace;
