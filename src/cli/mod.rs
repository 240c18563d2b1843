//! Command-line interface

pub mod commands;

pub use commands::{
    cmd_keygen, cmd_sign_tx, cmd_start, parse_peers, signed_transfer, CliResult, StartOptions,
};
