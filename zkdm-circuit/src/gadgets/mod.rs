// zkdm/zkdm-circuit/src/gadgets/mod.rs

pub mod computation;
pub mod poseidon;
