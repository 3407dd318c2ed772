mod common;
mod responses;
