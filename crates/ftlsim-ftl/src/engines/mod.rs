//! The four write policies.

mod inplace;
mod pagelog;
mod sbmap;
mod sblog;

pub use inplace::InplaceEngine;
pub use pagelog::PageLogEngine;
pub use sbmap::SbMapEngine;
pub use sblog::SbLogEngine;
