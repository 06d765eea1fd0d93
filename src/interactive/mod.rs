// Command line entry points. `simulate` runs a three-node payment over
// in-memory links; `decode` inspects a single wire message.

pub mod decode;
pub mod simulate;
