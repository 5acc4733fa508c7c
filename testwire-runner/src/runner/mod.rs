// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The executor invocation loop and its dispatch strategies.
//!
//! The main structure in this module is [`RunnerLoop`].

mod by_source;
mod by_test_list;
mod imp;
mod recorder;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use by_source::*;
pub use by_test_list::*;
pub use imp::*;
pub use recorder::*;
