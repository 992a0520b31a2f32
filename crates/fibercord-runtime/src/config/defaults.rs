//! Compile-time cord defaults, generated by build.rs.

include!(concat!(env!("OUT_DIR"), "/fibercord_defaults.rs"));
