//! CLI subcommands

pub mod address;
pub mod info;
pub mod keygen;
pub mod purchase;
pub mod tickets;
