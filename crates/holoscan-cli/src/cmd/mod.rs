pub mod nics;
pub mod package;
pub mod run;
pub mod version;
