mod methods;

pub use methods::*;
