//! `vne` embeds virtual networks onto a substrate network. Given a substrate of nodes and links
//! with finite resources and a sequence of virtual network requests, it maps every request with
//! one of several algorithms (greedy, coordinated, distributed or mathematical programming) and
//! reports which requests were accepted and how much of the substrate they consumed. Experiments
//! sweep an algorithm's parameters and run one independent trial per parameter set.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
pub mod solvers;
pub mod utils;
