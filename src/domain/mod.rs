pub mod forecast;
pub mod horizon;
pub mod run;
pub mod site;

pub use forecast::*;
pub use horizon::*;
pub use run::*;
pub use site::*;
