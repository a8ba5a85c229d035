pub mod catalog;
pub mod echo;
pub mod echo_multi;

pub use catalog::*;
pub use echo::Echo;
pub use echo_multi::EchoMulti;
