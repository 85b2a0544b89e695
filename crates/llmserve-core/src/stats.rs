//! Run statistics derived from the engine counters.

use serde::Serialize;
use std::fmt;

use crate::engine::GenerationContext;

const SIGNIFICANT_DIGITS: i32 = 6;
const RULE: &str = "#################################";

/// Derived metrics for one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunStatistics {
    pub prompt_tokens: usize,
    pub decode_tokens: usize,
    pub prefill_s: f64,
    pub decode_s: f64,
    pub sample_s: f64,
    /// Prompt tokens per second of prefill, 0 when prefill took no time
    pub prefill_speed: f64,
    /// Generated tokens per second of decode, 0 when decode took no time
    pub decode_speed: f64,
}

impl RunStatistics {
    pub fn from_context(context: &GenerationContext) -> Self {
        let prefill_s = micros_to_secs(context.prefill_us);
        let decode_s = micros_to_secs(context.decode_us);
        let sample_s = micros_to_secs(context.sample_us);

        Self {
            prompt_tokens: context.prompt_len,
            decode_tokens: context.gen_seq_len,
            prefill_s,
            decode_s,
            sample_s,
            prefill_speed: throughput(context.prompt_len, prefill_s),
            decode_speed: throughput(context.gen_seq_len, decode_s),
        }
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "prompt tokens num = {}", self.prompt_tokens)?;
        writeln!(f, "decode tokens num = {}", self.decode_tokens)?;
        writeln!(f, "prefill time = {} s", format_float(self.prefill_s))?;
        writeln!(f, " decode time = {} s", format_float(self.decode_s))?;
        writeln!(f, " sample time = {} s", format_float(self.sample_s))?;
        writeln!(f, "prefill speed = {} tok/s", format_float(self.prefill_speed))?;
        writeln!(f, " decode speed = {} tok/s", format_float(self.decode_speed))?;
        writeln!(f, "{}", RULE)
    }
}

/// Render the trailing performance report.
pub fn render(stats: &RunStatistics) -> String {
    stats.to_string()
}

fn micros_to_secs(us: u64) -> f64 {
    us as f64 / 1e6
}

fn throughput(count: usize, elapsed_s: f64) -> f64 {
    if elapsed_s > 0.0 {
        count as f64 / elapsed_s
    } else {
        0.0
    }
}

/// `%g` style: six significant digits, trailing zeros trimmed, exponent
/// form below 1e-4 and from 1e6 upward.
fn format_float(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }

    // the exponent after rounding decides the notation
    let scientific = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };

    if exponent < -4 || exponent >= SIGNIFICANT_DIGITS {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exponent.abs())
    } else {
        let decimals = (SIGNIFICANT_DIGITS - 1 - exponent) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
