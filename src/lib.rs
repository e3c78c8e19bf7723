//! fieldscope: configurable acquisition and processing pipelines
//!
//! A configuration declares one shell, any number of inlets and an ordered
//! chain of processors. The [`runtime::PipelineExecutor`] wires them together:
//! the shell triggers cycles, inlets produce [`chunk::DataChunk`]s and
//! processors derive new chunks from them.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod inlet;
pub mod processor;
pub mod runtime;
pub mod server;
pub mod shell;
