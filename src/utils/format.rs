// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/utils/format.rs
// Version: 0.3.2
//
// This file provides utility functions for formatting statistics in the TOS
// miner, located in the utils subdirectory. It formats hash rates, uptime
// and large counters for consistent output in logs.
//
// Tree Location:
// - src/utils/format.rs (formatting utilities)
// - Depends on: std

use std::time::Duration;

/// Utility functions for formatting miner statistics
pub struct FormatUtils;

impl FormatUtils {
    /// Format a hash rate, scaling the unit until the value is readable.
    /// Raw H/s are shown without decimals (a memory-hard CPU rate is small
    /// and fractions of a hash per second carry no information).
    pub fn format_hashrate(rate: f64) -> String {
        const UNITS: [&str; 4] = ["H/s", "kH/s", "MH/s", "GH/s"];

        let mut value = rate.max(0.0);
        let mut unit = 0;
        while value >= 1_000.0 && unit < UNITS.len() - 1 {
            value /= 1_000.0;
            unit += 1;
        }

        if unit == 0 {
            format!("{:.0} {}", value, UNITS[0])
        } else {
            format!("{:.2} {}", value, UNITS[unit])
        }
    }

    /// Format an uptime as h:mm:ss
    pub fn format_uptime(duration: Duration) -> String {
        let secs = duration.as_secs();
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// Compact display for large counters. Values up to four digits stay
    /// exact (share counts live there for a long time); beyond that the
    /// k/M/G buckets keep three significant figures.
    pub fn format_number(num: u64) -> String {
        match num {
            0..=9_999 => num.to_string(),
            10_000..=999_999 => format!("{:.1}k", num as f64 / 1_000.0),
            1_000_000..=999_999_999 => format!("{:.2}M", num as f64 / 1_000_000.0),
            _ => format!("{:.2}G", num as f64 / 1_000_000_000.0),
        }
    }
}
