//! Command-line interface and run-time settings

pub mod settings;

pub use settings::{
    chunk_size_from_factor, parse_compression, parse_session_arg, parse_source, CliArgs, Command,
};
