pub mod assemble;
pub mod master;
pub mod pipeline;
