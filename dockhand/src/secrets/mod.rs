//! Secret handling: AEAD codec and child-process env construction

pub mod codec;
pub mod env;

pub use codec::SecretsCodec;
pub use env::{build_env, BuiltEnv};
