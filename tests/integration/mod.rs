//! Integration tests for ci-dispatch

mod common;
mod submission_flow;
