pub mod blake;

pub use blake::{fingerprint, hash_data, hash_file, Fingerprint};
