//! Container engine internals
//!
//! Codecs are layered bottom-up: [`buffer`] primitives, then the
//! [`header`], [`key`], [`directory`] and [`object`] records built on them.
//! [`file`] sequences them into the open and create paths.

pub mod allocator;
pub mod buffer;
pub mod datime;
pub mod directory;
pub mod error;
pub mod file;
pub mod header;
pub mod io;
pub mod key;
pub mod object;
pub mod streamer;
pub mod validation;
