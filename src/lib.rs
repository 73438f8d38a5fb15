pub mod browser;
pub mod dom;
pub mod generator;
pub mod matcher;
pub mod mcp;
pub mod prefs;
pub mod relative;
pub mod serialize;
pub mod syntax;
pub mod target;
pub mod text;
pub mod validate;
pub mod xpath;
