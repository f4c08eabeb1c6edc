//! Configuration accepted from the surrounding CLI wrapper (spec section 6).
//! The wrapper itself is out of scope; this struct is the contract between
//! it and the library entry point.

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    /// Prepended to every emitted operator and bareword constant.
    pub prefix: String,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub include: bool,
    pub test: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prefix: "MVM_JIT_".to_string(),
            input: None,
            output: None,
            include: true,
            test: false,
        }
    }
}
