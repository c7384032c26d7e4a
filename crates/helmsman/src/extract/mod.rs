//! Recovering the assistant's reply from decorated terminal text.
//!
//! Both stages are pure: [`strip_decoration`] turns captured scrollback into
//! plain text, and a [`ReplyExtractor`] finds the latest reply block in it.
//! The marker glyphs live in a [`MarkerSet`] so they can follow the driven
//! program's rendering without code changes.

mod ansi;
mod reply;

pub use ansi::strip_decoration;
pub use reply::{MarkerExtractor, MarkerSet, ReplyBlock, ReplyExtractor, limit_reply_size};
