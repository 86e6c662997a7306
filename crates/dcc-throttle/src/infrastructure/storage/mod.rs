//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the layout description (decoders,
//! locomotives, consists) and the interface settings from a TOML file in the
//! platform config directory, and writes the interface settings back when
//! the user changes them.  A missing file is not an error: the first run
//! starts from defaults.

pub mod config;
