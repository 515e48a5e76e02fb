pub mod db;
pub mod debug;
pub mod fs;
