//! Transfer code generation

use rand::Rng;

/// Default number of digits in a generated code.
pub const DEFAULT_CODE_LEN: usize = 6;

/// Generate a uniformly random decimal code of `len` digits.
pub fn generate_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}
