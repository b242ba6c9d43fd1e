//! Data types shared by the Bronze and Silver layers.
//!
//! Rows travel between components as [`RowSet`]s of typed [`Cell`]s. Per-table outcomes are
//! [`ProcessingResult`] records that roll up into a [`RunSummary`].

mod cell;
mod key;
mod result;
mod run;
mod summary;
mod table_row;

pub use cell::*;
pub use key::*;
pub use result::*;
pub use run::*;
pub use summary::*;
pub use table_row::*;
