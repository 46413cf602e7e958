//! Resource-quantity parsing shared by capacity probing and Machine selection.

pub mod quantity;
