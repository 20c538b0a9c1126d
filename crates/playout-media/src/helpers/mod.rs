// crates/playout-media/src/helpers/mod.rs
//
// Internal helper modules — decode implementation details, not part of the
// crate's public API.

pub mod yuv;
pub mod seek;