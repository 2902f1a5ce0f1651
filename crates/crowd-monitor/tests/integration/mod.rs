//! Integration tests for crowd-monitor.
//!
//! These tests verify the interaction between components:
//! - Push session lifecycle against a Socket.IO server
//! - Snapshot, history and push updates flowing into the view

#![allow(dead_code)]

pub mod common;
