//! The shared data model, re-exported so engine code and downstream users can
//! reach it through `evalrun_core::types`.

pub use evalrun_types::*;
