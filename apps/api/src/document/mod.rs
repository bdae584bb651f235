//! The document pipeline: validate → map → fill → convert.
//!
//! Everything here except the converter is synchronous and free of network
//! I/O; orchestration lives in `crate::generation`.

pub mod converter;
pub mod docx_xml;
pub mod filler;
pub mod formatter;
pub mod mapper;
pub mod validator;
