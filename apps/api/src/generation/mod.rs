// Generation pipeline: request handling, rate limiting, filenames and the
// orchestrator that drives validate → map → fill → convert → package.

pub mod filename;
pub mod handlers;
pub mod orchestrator;
pub mod rate_limit;
