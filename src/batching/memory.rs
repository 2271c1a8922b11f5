//! Resident memory probing for the memory-pressure valve.

use std::fs;

/// Page size assumed when converting `/proc/self/statm` pages to bytes.
const PAGE_SIZE: u64 = 4096;

/// Source of the process's resident memory size.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` if it cannot be determined.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads resident pages from `/proc/self/statm` (Linux only).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatmProbe;

impl MemoryProbe for ProcStatmProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let statm = fs::read_to_string("/proc/self/statm").ok()?;
        parse_statm(&statm)
    }
}

/// Second field of statm is resident pages.
fn parse_statm(statm: &str) -> Option<u64> {
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages.saturating_mul(PAGE_SIZE))
}
