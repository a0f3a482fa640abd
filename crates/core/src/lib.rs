// scrawl-core: shared engine types for the scrawl workspace

pub mod ot;
pub mod protocol;
pub mod rope;
pub mod shift;
pub mod types;
