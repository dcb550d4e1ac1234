//! The two platform security models behind `AccessModel`.

mod implicit;
mod token;

pub use implicit::ImplicitPathAccess;
pub use token::TokenBasedAccess;
