//! Strata CLI - base image warming and Dockerfile inspection.

pub mod commands;
pub mod output;
