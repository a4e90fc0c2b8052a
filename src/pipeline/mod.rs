//! Scan → extract → transform → load, sequenced by [`Pipeline`].

mod extract;
mod load;
mod run;
mod scan;
mod transform;

pub use run::Pipeline;
