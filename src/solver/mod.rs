//! Linear SVM solvers
//!
//! Binary problems are solved in the dual by coordinate descent; the
//! multiclass classifier combines one binary solution per class.

pub mod dcd;

pub use self::dcd::*;
