//! Receivables Service - payment allocation and return settlement over invoices.

pub mod config;
pub mod error;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
