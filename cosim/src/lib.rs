//! The `cosim` command line tool and the pieces it is made of: built-in
//! models, session files and prebuilt in-process sessions.

pub mod cli;
pub mod models;
pub mod session_file;
pub mod simulations;
