//! Convergence support shared by the controllers.

pub mod retry;
