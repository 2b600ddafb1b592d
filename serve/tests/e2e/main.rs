mod common;
mod flows;
mod streaming;
