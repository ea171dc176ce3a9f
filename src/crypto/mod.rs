pub mod password;
pub mod token;

pub use password::{generate_secret, hash_password, verify_password};
pub use token::{Claims, TokenAlgorithm, TokenIssuer};
